// Scope-granular descriptor resolution.
//
// Resolvers look up one scope at a time and never merge scopes themselves;
// where each scope's list lands in the final chain is the composition
// engine's decision. All resolvers tolerate controllers with no metadata and
// return empty lists, never errors.

use crate::descriptor::{ControllerId, ParamInjector, PolicyDecl, SendPolicy};
use crate::store::DescriptorStore;
use crate::{ErrorHandler, Middleware};

/// Ordered middleware for one scope (class when `member` is None).
pub fn resolve_middlewares(
    store: &DescriptorStore,
    id: ControllerId,
    member: Option<&str>,
) -> Vec<Middleware> {
    store.middlewares(id, member)
}

/// Ordered error handlers for one scope.
pub fn resolve_error_handlers(
    store: &DescriptorStore,
    id: ControllerId,
    member: Option<&str>,
) -> Vec<ErrorHandler> {
    store.error_handlers(id, member)
}

/// Parameter injectors for a handler, ordered by parameter index. An empty
/// list means "pass raw transport arguments unchanged".
pub fn resolve_param_injectors(
    store: &DescriptorStore,
    id: ControllerId,
    member: &str,
) -> Vec<ParamInjector> {
    store.param_injectors(id, member)
}

/// Resolve the effective send policy for a route.
///
/// Resolution order: explicit "don't send" wins, then a method policy merged
/// over the class policy, then the class policy alone, then no policy at all
/// (the handler sends for itself).
pub fn resolve_send_policy(
    store: &DescriptorStore,
    id: ControllerId,
    member: &str,
) -> Option<SendPolicy> {
    let method = store.send_policy_decl(id, Some(member));
    let class = store.send_policy_decl(id, None);
    match (method, class) {
        (Some(PolicyDecl::Suppressed), _) => None,
        (Some(PolicyDecl::Declared(m)), Some(PolicyDecl::Declared(c))) => Some(m.merge_over(&c)),
        (Some(PolicyDecl::Declared(m)), _) => Some(m),
        (None, Some(PolicyDecl::Suppressed)) => None,
        (None, Some(PolicyDecl::Declared(c))) => Some(c),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Flow, SendPolicy};

    struct Plain;

    fn noop() -> Middleware {
        Middleware::new(|_req, _res| Box::pin(async { Ok(Flow::Continue) }))
    }

    #[test]
    fn test_resolve_on_bare_class_is_empty() {
        let store = DescriptorStore::new();
        let id = ControllerId::of::<Plain>();
        assert!(resolve_middlewares(&store, id, None).is_empty());
        assert!(resolve_middlewares(&store, id, Some("list")).is_empty());
        assert!(resolve_error_handlers(&store, id, None).is_empty());
        assert!(resolve_param_injectors(&store, id, "list").is_empty());
        assert_eq!(resolve_send_policy(&store, id, "list"), None);
    }

    #[test]
    fn test_scopes_not_merged_by_resolver() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Plain", || Plain);
        store.use_middleware(id, None, vec![noop(), noop()]);
        store.use_middleware(id, Some("list"), vec![noop()]);
        assert_eq!(resolve_middlewares(&store, id, None).len(), 2);
        assert_eq!(resolve_middlewares(&store, id, Some("list")).len(), 1);
    }

    #[test]
    fn test_policy_method_merged_over_class() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Plain", || Plain);
        store.send_policy(id, None, SendPolicy::new().status(201).null_status(204));
        store.send_policy(id, Some("show"), SendPolicy::new().undefined_status(404));
        let policy = resolve_send_policy(&store, id, "show").unwrap();
        assert_eq!(policy.status, Some(201));
        assert_eq!(policy.null_status, Some(204));
        assert_eq!(policy.undefined_status, Some(404));
    }

    #[test]
    fn test_policy_class_alone() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Plain", || Plain);
        store.send_policy(id, None, SendPolicy::new().status(200));
        let policy = resolve_send_policy(&store, id, "anything").unwrap();
        assert_eq!(policy.status, Some(200));
    }

    #[test]
    fn test_policy_suppression_wins() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Plain", || Plain);
        store.send_policy(id, None, SendPolicy::new().status(200));
        store.suppress_send(id, Some("manual"));
        assert_eq!(resolve_send_policy(&store, id, "manual"), None);

        store.suppress_send(id, None);
        assert_eq!(resolve_send_policy(&store, id, "other"), None);
    }

    #[test]
    fn test_method_declaration_overrides_class_suppression() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Plain", || Plain);
        store.suppress_send(id, None);
        store.send_policy(id, Some("send_anyway"), SendPolicy::new().status(202));
        let policy = resolve_send_policy(&store, id, "send_anyway").unwrap();
        assert_eq!(policy.status, Some(202));
    }
}
