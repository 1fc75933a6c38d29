// The composition engine.
//
// Composition runs once at startup, single-threaded: pure data
// transformation from descriptors into mounted chains. Each controller walks
// a small state machine; the states exist for trace output and to keep the
// attachment order honest, not for runtime branching.
//
// Mounting rules:
//   - a controller without router metadata mounts its routes directly on the
//     parent scope, with class-scope middlewares and error handlers wrapped
//     around each individual route;
//   - a controller with router metadata gets a sub-scope: class middlewares
//     mounted once, routes on the sub-scope, class error handlers appended
//     after routes and recursed children so late errors still reach them.

use crate::dedup::{dedup_required, seed_schedule};
use crate::descriptor::{ControllerId, RouteDescriptor};
use crate::resolve::{
    resolve_error_handlers, resolve_middlewares, resolve_param_injectors, resolve_send_policy,
};
use crate::scope::{MountedRoute, Scope};
use crate::store::DescriptorStore;
use crate::synthesize::synthesize;
use crate::{descriptor::ControllerInstance, Error, Middleware};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unattached,
    ResolvingRouter,
    ResolvingRoutes,
    MountingRoutes,
    RecursingChildren,
    Mounted,
}

fn transition(name: &str, state: &mut State, to: State) {
    tracing::trace!(controller = name, from = ?state, to = ?to, "composition");
    *state = to;
}

/// Compose every listed controller onto the root scope.
///
/// The dedup seed is read from the scope's live mounted-middleware list, so
/// calling this again after mounting more globals never double-counts the
/// ones already seen.
pub fn compose(
    store: &DescriptorStore,
    root: &mut Scope,
    controllers: &[ControllerId],
) -> Result<(), Error> {
    let globals = root.mounted_middlewares().to_vec();
    for &id in controllers {
        attach(store, root, id, &globals, &[], false)?;
    }
    Ok(())
}

fn attach(
    store: &DescriptorStore,
    parent: &mut Scope,
    id: ControllerId,
    globals: &[Middleware],
    ancestor_shared: &[Middleware],
    as_child: bool,
) -> Result<(), Error> {
    let mut state = State::Unattached;
    let name = store
        .name(id)
        .ok_or_else(|| Error::UnknownController(format!("{:?}", id)))?;

    transition(name, &mut state, State::ResolvingRouter);
    let router = store.router_meta(id);
    if as_child && router.is_none() {
        // A child has no scope of its own to mount at. Programmer error,
        // surfaced at registration.
        return Err(Error::ChildWithoutRouter(name.to_string()));
    }

    transition(name, &mut state, State::ResolvingRoutes);
    let routes = store.routes(id);
    if routes.is_empty() && router.is_none() {
        tracing::warn!(
            controller = name,
            "controller declares neither routes nor router metadata; skipping"
        );
        return Ok(());
    }

    let instance = store
        .instance_of(id)
        .ok_or_else(|| Error::UnknownController(name.to_string()))?;
    let class_middlewares = resolve_middlewares(store, id, None);
    let class_error_handlers = resolve_error_handlers(store, id, None);

    transition(name, &mut state, State::MountingRoutes);
    match router {
        Some(meta) => {
            let mut sub = Scope::new(meta.options);
            for middleware in &class_middlewares {
                sub.use_middleware(middleware.clone());
            }
            for route in &routes {
                sub.mount(build_route(
                    store,
                    id,
                    name,
                    route,
                    instance.clone(),
                    globals,
                    ancestor_shared,
                    &class_middlewares,
                    false,
                ));
            }

            transition(name, &mut state, State::RecursingChildren);
            let mut shared = ancestor_shared.to_vec();
            shared.extend(class_middlewares.iter().cloned());
            for child in store.children(id) {
                attach(store, &mut sub, child, globals, &shared, true)?;
            }

            for handler in class_error_handlers {
                sub.append_error_handler(handler);
            }
            parent.mount_scope(meta.root.clone(), sub);
        }
        None => {
            for route in &routes {
                parent.mount(build_route(
                    store,
                    id,
                    name,
                    route,
                    instance.clone(),
                    globals,
                    ancestor_shared,
                    &class_middlewares,
                    true,
                ));
            }

            transition(name, &mut state, State::RecursingChildren);
            let mut shared = ancestor_shared.to_vec();
            shared.extend(class_middlewares.iter().cloned());
            for child in store.children(id) {
                attach(store, parent, child, globals, &shared, true)?;
            }
        }
    }

    transition(name, &mut state, State::Mounted);
    tracing::debug!(controller = name, routes = routes.len(), "controller mounted");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_route(
    store: &DescriptorStore,
    id: ControllerId,
    name: &'static str,
    route: &RouteDescriptor,
    instance: ControllerInstance,
    globals: &[Middleware],
    ancestor_shared: &[Middleware],
    class_middlewares: &[Middleware],
    wrap_class: bool,
) -> MountedRoute {
    let method_middlewares = resolve_middlewares(store, id, Some(route.member));
    let injectors = resolve_param_injectors(store, id, route.member);
    let policy = resolve_send_policy(store, id, route.member);

    let seed = seed_schedule(globals, ancestor_shared, class_middlewares, &method_middlewares);
    let additional = dedup_required(&seed, &injectors);

    let handler = synthesize(route, instance, injectors, policy, name);

    let mut chain = Vec::new();
    if wrap_class {
        chain.extend(class_middlewares.iter().cloned());
    }
    chain.extend(method_middlewares);
    chain.extend(additional);

    let mut error_handlers = resolve_error_handlers(store, id, Some(route.member));
    if wrap_class {
        error_handlers.extend(resolve_error_handlers(store, id, None));
    }

    MountedRoute {
        verb: route.verb,
        path: route.path.clone(),
        chain,
        handler,
        error_handlers,
    }
}
