// Middleware deduplication.
//
// Several parameter injectors and several declaration scopes may
// independently require the same non-idempotent middleware (a body decoder
// drains its transport exactly once: a second run blocks or throws). The
// composed chain therefore schedules such a middleware at most once.
//
// Comparison rules:
//   - by function reference, always;
//   - by declared name, only when the requiring injector is dedupe-eligible
//     (covers two independently-constructed closures wrapping the same named
//     factory);
//   - anonymous middlewares are never compared by name.
//
// Ineligible duplicates are deliberately left in place: silently "fixing"
// them would mask the caller's declaration.

use crate::descriptor::ParamInjector;
use crate::Middleware;

/// Build the ordered "already scheduled" set for one route, in mounting
/// order: globally-mounted middlewares, the accumulated shared middlewares
/// of all ancestor scopes, the controller's class scope, then the route's
/// method scope.
pub fn seed_schedule(
    globals: &[Middleware],
    ancestor_shared: &[Middleware],
    class_scope: &[Middleware],
    route_scope: &[Middleware],
) -> Vec<Middleware> {
    let mut scheduled =
        Vec::with_capacity(globals.len() + ancestor_shared.len() + class_scope.len() + route_scope.len());
    scheduled.extend_from_slice(globals);
    scheduled.extend_from_slice(ancestor_shared);
    scheduled.extend_from_slice(class_scope);
    scheduled.extend_from_slice(route_scope);
    scheduled
}

/// Select the additional middlewares a route still needs, walking injectors
/// in declared parameter order and their requirements in declared order.
pub fn dedup_required(scheduled: &[Middleware], injectors: &[ParamInjector]) -> Vec<Middleware> {
    let mut selected: Vec<Middleware> = Vec::new();

    for injector in injectors {
        for required in injector.required_middlewares() {
            let already_by_ref = scheduled
                .iter()
                .chain(selected.iter())
                .any(|m| m.same_fn(required));
            if already_by_ref {
                continue;
            }

            if injector.dedupe_eligible && required.name().is_some() {
                let already_by_name = scheduled
                    .iter()
                    .chain(selected.iter())
                    .any(|m| m.same_name(required));
                if already_by_name {
                    continue;
                }
            }

            // Recording the handle covers both identities: later comparisons
            // against `selected` see its reference and its name.
            selected.push(required.clone());
        }
    }

    selected
}
