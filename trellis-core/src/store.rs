// Descriptor store: the explicit attachment surface.
//
// An arena-like mapping from (controller, member) to descriptor lists,
// populated by ordinary function calls. Attachment has no interesting
// failure modes: writes append, reads on absent metadata return empty lists
// or None. Stacked same-scope declarations concatenate in call order, which
// is the declared textual order.

use crate::descriptor::{
    ControllerDescriptor, ControllerId, ControllerInstance, ParamInjector, PolicyDecl,
    RouteDescriptor, RouteFn, RouterDescriptor, ScopeOptions, SendPolicy,
};
use crate::{ErrorHandler, HttpMethod, Middleware};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

enum InstanceSource {
    /// A ready instance was registered.
    Ready(ControllerInstance),
    /// A class was registered; the factory runs at most once.
    Factory(Arc<dyn Fn() -> ControllerInstance + Send + Sync>),
}

#[derive(Default)]
struct ScopeEntry {
    middlewares: Vec<Middleware>,
    error_handlers: Vec<ErrorHandler>,
    params: Vec<ParamInjector>,
    policy: Option<PolicyDecl>,
}

struct ControllerEntry {
    name: &'static str,
    source: InstanceSource,
    built: OnceLock<ControllerInstance>,
    router: Option<RouterDescriptor>,
    children: Vec<ControllerId>,
    routes: Vec<RouteDescriptor>,
    class: ScopeEntry,
    members: HashMap<&'static str, ScopeEntry>,
}

impl ControllerEntry {
    fn member(&mut self, member: &'static str) -> &mut ScopeEntry {
        self.members.entry(member).or_default()
    }

    fn scope(&self, member: Option<&str>) -> Option<&ScopeEntry> {
        match member {
            None => Some(&self.class),
            Some(m) => self.members.get(m),
        }
    }
}

/// The descriptor store.
#[derive(Default)]
pub struct DescriptorStore {
    controllers: HashMap<ControllerId, ControllerEntry>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- attachment (write) surface -----

    /// Register a controller class with a factory; the instance is
    /// constructed lazily, once, on first use during composition.
    pub fn controller<C, F>(&mut self, name: &'static str, factory: F) -> ControllerId
    where
        C: Send + Sync + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let id = ControllerId::of::<C>();
        self.controllers.insert(
            id,
            ControllerEntry {
                name,
                source: InstanceSource::Factory(Arc::new(move || {
                    Arc::new(factory()) as ControllerInstance
                })),
                built: OnceLock::new(),
                router: None,
                children: Vec::new(),
                routes: Vec::new(),
                class: ScopeEntry::default(),
                members: HashMap::new(),
            },
        );
        id
    }

    /// Register an already-constructed controller instance.
    pub fn instance<C: Send + Sync + 'static>(
        &mut self,
        name: &'static str,
        instance: C,
    ) -> ControllerId {
        let id = ControllerId::of::<C>();
        self.controllers.insert(
            id,
            ControllerEntry {
                name,
                source: InstanceSource::Ready(Arc::new(instance)),
                built: OnceLock::new(),
                router: None,
                children: Vec::new(),
                routes: Vec::new(),
                class: ScopeEntry::default(),
                members: HashMap::new(),
            },
        );
        id
    }

    /// Attach router metadata: root path and scope options.
    pub fn router(&mut self, id: ControllerId, root: &str, options: ScopeOptions) {
        if let Some(entry) = self.controllers.get_mut(&id) {
            entry.router = Some(RouterDescriptor {
                root: root.to_string(),
                options,
            });
        }
    }

    /// Declare a child controller, mounted inside the parent's scope.
    pub fn child(&mut self, parent: ControllerId, child: ControllerId) {
        if let Some(entry) = self.controllers.get_mut(&parent) {
            entry.children.push(child);
        }
    }

    /// Declare a route on a controller member.
    pub fn route(
        &mut self,
        id: ControllerId,
        verb: HttpMethod,
        path: &str,
        member: &'static str,
        handler: RouteFn,
    ) {
        if let Some(entry) = self.controllers.get_mut(&id) {
            entry.routes.push(RouteDescriptor {
                verb,
                path: path.to_string(),
                member,
                handler,
            });
        }
    }

    /// Attach a middleware group to the class scope (member = None) or a
    /// member scope. Groups concatenate in call order.
    pub fn use_middleware(
        &mut self,
        id: ControllerId,
        member: Option<&'static str>,
        group: Vec<Middleware>,
    ) {
        if let Some(entry) = self.controllers.get_mut(&id) {
            let scope = match member {
                None => &mut entry.class,
                Some(m) => entry.member(m),
            };
            scope.middlewares.extend(group);
        }
    }

    /// Attach an error-handler group, same ordering rules as middleware.
    pub fn catch(
        &mut self,
        id: ControllerId,
        member: Option<&'static str>,
        group: Vec<ErrorHandler>,
    ) {
        if let Some(entry) = self.controllers.get_mut(&id) {
            let scope = match member {
                None => &mut entry.class,
                Some(m) => entry.member(m),
            };
            scope.error_handlers.extend(group);
        }
    }

    /// Attach a parameter injector to a handler member.
    pub fn param(&mut self, id: ControllerId, member: &'static str, injector: ParamInjector) {
        if let Some(entry) = self.controllers.get_mut(&id) {
            let scope = entry.member(member);
            scope.params.push(injector);
            // Ordered by parameter index; insertion order breaks ties.
            scope.params.sort_by_key(|p| p.index);
        }
    }

    /// Declare a send policy on the class or a member.
    pub fn send_policy(&mut self, id: ControllerId, member: Option<&'static str>, policy: SendPolicy) {
        if let Some(entry) = self.controllers.get_mut(&id) {
            let scope = match member {
                None => &mut entry.class,
                Some(m) => entry.member(m),
            };
            scope.policy = Some(PolicyDecl::Declared(policy));
        }
    }

    /// Explicitly suppress auto-send on the class or a member.
    pub fn suppress_send(&mut self, id: ControllerId, member: Option<&'static str>) {
        if let Some(entry) = self.controllers.get_mut(&id) {
            let scope = match member {
                None => &mut entry.class,
                Some(m) => entry.member(m),
            };
            scope.policy = Some(PolicyDecl::Suppressed);
        }
    }

    // ----- read surface -----

    pub fn is_registered(&self, id: ControllerId) -> bool {
        self.controllers.contains_key(&id)
    }

    pub fn name(&self, id: ControllerId) -> Option<&'static str> {
        self.controllers.get(&id).map(|e| e.name)
    }

    /// The controller instance, constructed on first call and reused.
    pub fn instance_of(&self, id: ControllerId) -> Option<ControllerInstance> {
        let entry = self.controllers.get(&id)?;
        let instance = entry.built.get_or_init(|| match &entry.source {
            InstanceSource::Ready(instance) => instance.clone(),
            InstanceSource::Factory(factory) => factory(),
        });
        Some(instance.clone())
    }

    pub fn routes(&self, id: ControllerId) -> Vec<RouteDescriptor> {
        self.controllers
            .get(&id)
            .map(|e| e.routes.clone())
            .unwrap_or_default()
    }

    pub fn router_meta(&self, id: ControllerId) -> Option<RouterDescriptor> {
        self.controllers.get(&id).and_then(|e| e.router.clone())
    }

    pub fn children(&self, id: ControllerId) -> Vec<ControllerId> {
        self.controllers
            .get(&id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    pub fn middlewares(&self, id: ControllerId, member: Option<&str>) -> Vec<Middleware> {
        self.controllers
            .get(&id)
            .and_then(|e| e.scope(member))
            .map(|s| s.middlewares.clone())
            .unwrap_or_default()
    }

    pub fn error_handlers(&self, id: ControllerId, member: Option<&str>) -> Vec<ErrorHandler> {
        self.controllers
            .get(&id)
            .and_then(|e| e.scope(member))
            .map(|s| s.error_handlers.clone())
            .unwrap_or_default()
    }

    pub fn param_injectors(&self, id: ControllerId, member: &str) -> Vec<ParamInjector> {
        self.controllers
            .get(&id)
            .and_then(|e| e.scope(Some(member)))
            .map(|s| s.params.clone())
            .unwrap_or_default()
    }

    /// Three-valued policy read: None = not declared, Suppressed = explicit
    /// "don't send", Declared = a policy object.
    pub fn send_policy_decl(&self, id: ControllerId, member: Option<&str>) -> Option<PolicyDecl> {
        self.controllers
            .get(&id)
            .and_then(|e| e.scope(member))
            .and_then(|s| s.policy)
    }

    /// Build the engine-facing descriptor for a controller.
    pub fn describe(&self, id: ControllerId) -> Option<ControllerDescriptor> {
        let name = self.name(id)?;
        let instance = self.instance_of(id)?;
        Some(ControllerDescriptor {
            id,
            name,
            router: self.router_meta(id),
            instance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::route_fn;
    use crate::synthesize::HandlerReturn;
    use crate::{Flow, Middleware};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Widgets;

    fn noop() -> Middleware {
        Middleware::new(|_req, _res| Box::pin(async { Ok(Flow::Continue) }))
    }

    #[test]
    fn test_missing_metadata_reads_are_empty() {
        let store = DescriptorStore::new();
        let id = ControllerId::of::<Widgets>();
        assert!(store.routes(id).is_empty());
        assert!(store.middlewares(id, None).is_empty());
        assert!(store.error_handlers(id, Some("list")).is_empty());
        assert!(store.param_injectors(id, "list").is_empty());
        assert_eq!(store.router_meta(id), None);
        assert_eq!(store.send_policy_decl(id, None), None);
    }

    #[test]
    fn test_registered_controller_without_members() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        assert!(store.is_registered(id));
        assert!(store.middlewares(id, Some("absent")).is_empty());
        assert!(store.param_injectors(id, "absent").is_empty());
    }

    #[test]
    fn test_stacked_groups_concatenate_in_call_order() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        let (a, b, c) = (noop(), noop(), noop());
        store.use_middleware(id, None, vec![a.clone()]);
        store.use_middleware(id, None, vec![b.clone(), c.clone()]);
        let resolved = store.middlewares(id, None);
        assert_eq!(resolved.len(), 3);
        assert!(resolved[0].same_fn(&a));
        assert!(resolved[1].same_fn(&b));
        assert!(resolved[2].same_fn(&c));
    }

    #[test]
    fn test_class_and_member_scopes_are_independent() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        let class_mw = noop();
        let member_mw = noop();
        store.use_middleware(id, None, vec![class_mw.clone()]);
        store.use_middleware(id, Some("list"), vec![member_mw.clone()]);
        let class = store.middlewares(id, None);
        let member = store.middlewares(id, Some("list"));
        assert_eq!(class.len(), 1);
        assert_eq!(member.len(), 1);
        assert!(class[0].same_fn(&class_mw));
        assert!(member[0].same_fn(&member_mw));
    }

    #[test]
    fn test_param_injectors_ordered_by_index() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        store.param(id, "show", ParamInjector::query_param(1, "page"));
        store.param(id, "show", ParamInjector::path_param(0, "id"));
        let injectors = store.param_injectors(id, "show");
        assert_eq!(injectors[0].index, 0);
        assert_eq!(injectors[1].index, 1);
    }

    #[test]
    fn test_send_policy_three_valued() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        assert_eq!(store.send_policy_decl(id, None), None);
        store.send_policy(id, None, SendPolicy::new().status(201));
        assert!(matches!(
            store.send_policy_decl(id, None),
            Some(PolicyDecl::Declared(_))
        ));
        store.suppress_send(id, Some("fire_and_forget"));
        assert_eq!(
            store.send_policy_decl(id, Some("fire_and_forget")),
            Some(PolicyDecl::Suppressed)
        );
    }

    #[test]
    fn test_instance_constructed_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);
        struct Counted;

        let mut store = DescriptorStore::new();
        let id = store.controller("Counted", || {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Counted
        });
        assert_eq!(BUILDS.load(Ordering::SeqCst), 0);
        let first = store.instance_of(id).unwrap();
        let second = store.instance_of(id).unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_route_attachment() {
        let mut store = DescriptorStore::new();
        let id = store.controller("Widgets", || Widgets);
        store.route(
            id,
            HttpMethod::Get,
            "/",
            "list",
            route_fn::<Widgets, _>(|_c, _args| {
                Box::pin(async { Ok(HandlerReturn::Undefined) })
            }),
        );
        let routes = store.routes(id);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].verb, HttpMethod::Get);
        assert_eq!(routes[0].member, "list");
    }

    #[test]
    fn test_children_recorded_in_order() {
        struct A;
        struct B;
        let mut store = DescriptorStore::new();
        let parent = store.controller("Widgets", || Widgets);
        let a = store.controller("A", || A);
        let b = store.controller("B", || B);
        store.child(parent, a);
        store.child(parent, b);
        assert_eq!(store.children(parent), vec![a, b]);
    }
}
