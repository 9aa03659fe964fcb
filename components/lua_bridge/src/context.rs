//! Per-instance bridge context and its side-table.
//!
//! Every interpreter instance owns one [`BridgeContext`]: its allocator, the
//! host callbacks registered on it, and the pending host exception slot.
//! Callbacks entered from the interpreter only receive a `lua_State`, so the
//! context is recovered through a process-wide table keyed by the address of
//! the instance's main thread. Coroutines share their main thread's context.

use crate::dispatch::FunctionDispatcher;
use crate::interceptor::{PrintSink, SharedHook};
use core_types::HostException;
use memory_manager::BoundedAllocator;
use mlua_sys as ffi;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::c_int;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

/// State shared between a [`Bridge`](crate::Bridge) and the callbacks the
/// interpreter makes into it.
pub struct BridgeContext {
    id: u64,
    allocator: BoundedAllocator,
    hook: RefCell<Option<SharedHook>>,
    print: RefCell<Option<Rc<dyn PrintSink>>>,
    dispatcher: RefCell<Option<Rc<dyn FunctionDispatcher>>>,
    pending: RefCell<Option<HostException>>,
}

impl BridgeContext {
    pub(crate) fn new(id: u64, memory_limit: usize) -> Self {
        BridgeContext {
            id,
            allocator: BoundedAllocator::new(memory_limit),
            hook: RefCell::new(None),
            print: RefCell::new(None),
            dispatcher: RefCell::new(None),
            pending: RefCell::new(None),
        }
    }

    /// Instance id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The instance's allocator.
    pub fn allocator(&self) -> &BoundedAllocator {
        &self.allocator
    }

    pub(crate) fn hook(&self) -> Option<SharedHook> {
        self.hook.borrow().clone()
    }

    pub(crate) fn replace_hook(&self, hook: Option<SharedHook>) -> Option<SharedHook> {
        self.hook.replace(hook)
    }

    pub(crate) fn print_sink(&self) -> Option<Rc<dyn PrintSink>> {
        self.print.borrow().clone()
    }

    pub(crate) fn replace_print_sink(
        &self,
        sink: Option<Rc<dyn PrintSink>>,
    ) -> Option<Rc<dyn PrintSink>> {
        self.print.replace(sink)
    }

    pub(crate) fn dispatcher(&self) -> Option<Rc<dyn FunctionDispatcher>> {
        self.dispatcher.borrow().clone()
    }

    pub(crate) fn replace_dispatcher(
        &self,
        dispatcher: Option<Rc<dyn FunctionDispatcher>>,
    ) -> Option<Rc<dyn FunctionDispatcher>> {
        self.dispatcher.replace(dispatcher)
    }

    /// Parks a host exception until the enclosing protected call returns.
    ///
    /// The first exception wins; a later one raised while unwinding is
    /// dropped.
    pub(crate) fn park(&self, exception: HostException) {
        let mut pending = self.pending.borrow_mut();
        if pending.is_some() {
            tracing::warn!(instance = self.id, %exception, "dropping host exception raised while another is pending");
            return;
        }
        tracing::warn!(instance = self.id, %exception, "host exception pending");
        *pending = Some(exception);
    }

    pub(crate) fn take_pending(&self) -> Option<HostException> {
        self.pending.borrow_mut().take()
    }

    /// Returns whether a host exception is waiting to surface.
    pub fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("id", &self.id)
            .field("allocator", &self.allocator)
            .field("has_hook", &self.hook.borrow().is_some())
            .field("has_print_sink", &self.print.borrow().is_some())
            .field("has_dispatcher", &self.dispatcher.borrow().is_some())
            .field("has_pending", &self.has_pending())
            .finish()
    }
}

#[derive(Clone, Copy)]
struct ContextPtr(NonNull<BridgeContext>);

// The pointer is only dereferenced on the thread driving the owning
// interpreter; the table itself just stores addresses.
unsafe impl Send for ContextPtr {}
unsafe impl Sync for ContextPtr {}

static REGISTRY: RwLock<BTreeMap<usize, ContextPtr>> = parking_lot::const_rwlock(BTreeMap::new());

/// Associates `context` with the interpreter whose main thread is `state`.
///
/// # Safety
///
/// `context` must stay valid until [`unregister`] is called for `state`.
pub(crate) unsafe fn register(state: *mut ffi::lua_State, context: NonNull<BridgeContext>) {
    REGISTRY.write().insert(state as usize, ContextPtr(context));
}

/// Removes the entry for `state` if it still belongs to `context`.
///
/// Once an interpreter is closed its main-thread address can be reused by a
/// new instance on another thread before this runs, so an entry owned by a
/// different context is left alone. Returns whether an entry was removed.
pub(crate) fn unregister(state: *mut ffi::lua_State, context: NonNull<BridgeContext>) -> bool {
    let mut registry = REGISTRY.write();
    match registry.get(&(state as usize)) {
        Some(entry) if entry.0 == context => {
            registry.remove(&(state as usize));
            true
        }
        _ => false,
    }
}

/// Number of live interpreter instances in the process.
pub fn registered_instances() -> usize {
    REGISTRY.read().len()
}

/// Recovers the context for `state`, which may be the main thread or any
/// coroutine of a registered instance.
///
/// # Safety
///
/// `state` must be a live interpreter thread. The returned reference must
/// not outlive the owning bridge.
pub(crate) unsafe fn lookup<'a>(state: *mut ffi::lua_State) -> Option<&'a BridgeContext> {
    let direct = REGISTRY.read().get(&(state as usize)).copied();
    let found = match direct {
        Some(ptr) => Some(ptr),
        None => {
            let main = main_thread(state)?;
            REGISTRY.read().get(&(main as usize)).copied()
        }
    };
    found.map(|ptr| &*ptr.0.as_ptr())
}

unsafe fn main_thread(state: *mut ffi::lua_State) -> Option<*mut ffi::lua_State> {
    if ffi::lua_checkstack(state, 1) == 0 {
        return None;
    }
    ffi::lua_rawgeti(state, ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_MAINTHREAD);
    let main = ffi::lua_tothread(state, -1);
    ffi::lua_settop(state, -2);
    (!main.is_null() && main != state).then_some(main)
}

/// Installed with `lua_atpanic`. An error outside every protected call means
/// the call discipline was broken, so the process cannot continue.
pub(crate) unsafe extern "C-unwind" fn panic_handler(state: *mut ffi::lua_State) -> c_int {
    let message = crate::gateway::error_message(state, -1);
    let instance = lookup(state).map(BridgeContext::id);
    tracing::error!(?instance, %message, "unprotected interpreter error, aborting");
    std::process::abort()
}
