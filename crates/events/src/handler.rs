/// Run one command against an aggregate in place: decide, then apply.
///
/// Used by tests and by callers that already hold a rehydrated aggregate.
/// The persisted path goes through the infra `CommandDispatcher`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockbundle_core::Aggregate,
{
    let events = aggregate.handle(command)?;
    for ev in &events {
        aggregate.apply(ev);
    }
    Ok(events)
}
