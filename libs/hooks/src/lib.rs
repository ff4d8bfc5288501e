//! # hooks
//!
//! Named extension points. Libraries register callouts under hook
//! names; at each hook point the server invokes the callouts in
//! library-index order with a [`CalloutHandle`] carrying the
//! invocation's arguments and a next-step flag.
//!
//! Libraries are compiled in and registered at startup through the
//! [`HookLibrary`] trait; a library whose `version()` disagrees with
//! [`HOOKS_API_VERSION`] refuses to load.
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::Arc,
};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace};

/// the callout ABI version libraries must be built against
pub const HOOKS_API_VERSION: u32 = 3;

/// hook invoked when a query has been parsed, before dispatch
pub const HOOK_PKT4_RECEIVE: &str = "pkt4_receive";
/// hook invoked when a response is built, before transmission
pub const HOOK_PKT4_SEND: &str = "pkt4_send";

/// hooks framework errors
#[derive(Error, Debug)]
pub enum Error {
    /// a library was built against a different callout ABI
    #[error("library {name:?} reports version {got}, expected {HOOKS_API_VERSION}")]
    VersionMismatch {
        /// library name
        name: String,
        /// the version the library reported
        got: u32,
    },
    /// a callout referenced a hook name nobody registered
    #[error("unknown hook {0:?}")]
    UnknownHook(String),
    /// a library's `load` rejected its parameters
    #[error("library {name:?} failed to load: {reason}")]
    LoadFailed {
        /// library name
        name: String,
        /// what the library reported
        reason: String,
    },
}

/// what the server should do once the callouts at a hook return
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// proceed normally
    #[default]
    Continue,
    /// omit the subsystem's default post-processing at this hook
    Skip,
    /// discard the packet
    Drop,
}

/// Per-invocation argument bag handed to every callout on a hook.
/// Arguments are name-keyed and dynamically typed.
#[derive(Default)]
pub struct CalloutHandle {
    args: HashMap<String, Box<dyn Any + Send>>,
    next_step: NextStep,
}

impl fmt::Debug for CalloutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalloutHandle")
            .field("args", &self.args.keys().collect::<Vec<_>>())
            .field("next_step", &self.next_step)
            .finish()
    }
}

impl CalloutHandle {
    /// fresh handle with no arguments and `NextStep::Continue`
    pub fn new() -> Self {
        Self::default()
    }

    /// store an argument under a name, replacing any previous value
    pub fn set_argument<T: Any + Send>(&mut self, name: &str, val: T) {
        self.args.insert(name.to_string(), Box::new(val));
    }

    /// fetch an argument by name and type
    pub fn get_argument<T: Any + Send>(&self, name: &str) -> Option<&T> {
        self.args.get(name).and_then(|v| v.downcast_ref())
    }

    /// fetch an argument mutably
    pub fn get_argument_mut<T: Any + Send>(&mut self, name: &str) -> Option<&mut T> {
        self.args.get_mut(name).and_then(|v| v.downcast_mut())
    }

    /// remove an argument, returning it if the type matches
    pub fn take_argument<T: Any + Send>(&mut self, name: &str) -> Option<T> {
        let boxed = self.args.remove(name)?;
        match boxed.downcast::<T>() {
            Ok(val) => Some(*val),
            Err(boxed) => {
                // wrong type requested, put it back
                self.args.insert(name.to_string(), boxed);
                None
            }
        }
    }

    /// the current next-step flag
    pub fn next_step(&self) -> NextStep {
        self.next_step
    }

    /// set the next-step flag; later callouts on the hook may override it
    pub fn set_next_step(&mut self, step: NextStep) {
        self.next_step = step;
    }
}

/// a callout function registered on a hook
pub type CalloutFn = Arc<dyn Fn(&mut CalloutHandle) + Send + Sync>;

/// A library of callouts, compiled into the server and registered at
/// startup.
pub trait HookLibrary: Send + Sync {
    /// the library's name, for diagnostics
    fn name(&self) -> &str;
    /// must equal [`HOOKS_API_VERSION`]
    fn version(&self) -> u32;
    /// called once before callout registration; `params` comes from the
    /// `hooks-libraries` config entry
    fn load(&self, params: &serde_json::Value) -> Result<(), String>;
    /// called at shutdown
    fn unload(&self) -> Result<(), String>;
    /// register this library's callouts; `lib_index` orders them
    /// against other libraries
    fn register(&self, lib_index: u32, callouts: &CalloutManager) -> Result<(), Error>;
}

struct HookEntry {
    lib_index: u32,
    callout: CalloutFn,
}

/// Registry of hook names and their ordered callout lists
#[derive(Default)]
pub struct CalloutManager {
    // hook name -> callouts sorted ascending by lib_index
    hooks: RwLock<HashMap<String, Vec<HookEntry>>>,
}

impl fmt::Debug for CalloutManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.read();
        f.debug_struct("CalloutManager")
            .field("hooks", &hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CalloutManager {
    /// new manager with the standard server hooks registered
    pub fn new() -> Self {
        let mgr = Self::default();
        mgr.register_hook(HOOK_PKT4_RECEIVE);
        mgr.register_hook(HOOK_PKT4_SEND);
        mgr
    }

    /// declare a hook point; idempotent
    pub fn register_hook(&self, name: &str) {
        self.hooks.write().entry(name.to_string()).or_default();
    }

    /// true if any callout is registered on the hook
    pub fn has_callouts(&self, name: &str) -> bool {
        self.hooks
            .read()
            .get(name)
            .map(|entries| !entries.is_empty())
            .unwrap_or(false)
    }

    /// register a callout on a hook; callouts run ascending by `lib_index`
    pub fn register_callout(
        &self,
        lib_index: u32,
        hook: &str,
        callout: CalloutFn,
    ) -> Result<(), Error> {
        let mut hooks = self.hooks.write();
        let entries = hooks
            .get_mut(hook)
            .ok_or_else(|| Error::UnknownHook(hook.to_string()))?;
        let at = entries
            .iter()
            .position(|e| e.lib_index > lib_index)
            .unwrap_or(entries.len());
        entries.insert(
            at,
            HookEntry {
                lib_index,
                callout,
            },
        );
        trace!(hook, lib_index, "registered callout");
        Ok(())
    }

    /// run every callout on the hook in order, sharing `handle`.
    /// Returns the handle's final next-step flag.
    pub fn call(&self, hook: &str, handle: &mut CalloutHandle) -> NextStep {
        // clone the arcs out so callouts run without the registry lock
        let callouts: Vec<CalloutFn> = {
            let hooks = self.hooks.read();
            match hooks.get(hook) {
                Some(entries) => entries.iter().map(|e| e.callout.clone()).collect(),
                None => return NextStep::Continue,
            }
        };
        for callout in callouts {
            callout(handle);
        }
        handle.next_step()
    }
}

/// Owns the loaded libraries and their callout registry
pub struct HooksManager {
    callouts: Arc<CalloutManager>,
    libraries: RwLock<Vec<Arc<dyn HookLibrary>>>,
}

impl fmt::Debug for HooksManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HooksManager")
            .field("libraries", &self.libraries.read().len())
            .finish()
    }
}

impl HooksManager {
    /// manager with the standard hooks declared and no libraries
    pub fn new() -> Self {
        Self {
            callouts: Arc::new(CalloutManager::new()),
            libraries: RwLock::new(vec![]),
        }
    }

    /// the callout registry, shared with the server pipeline
    pub fn callouts(&self) -> Arc<CalloutManager> {
        self.callouts.clone()
    }

    /// version-check, load and register a library. The library index is
    /// its position in load order.
    pub fn load_library(
        &self,
        library: Arc<dyn HookLibrary>,
        params: &serde_json::Value,
    ) -> Result<(), Error> {
        if library.version() != HOOKS_API_VERSION {
            return Err(Error::VersionMismatch {
                name: library.name().to_string(),
                got: library.version(),
            });
        }
        library.load(params).map_err(|reason| Error::LoadFailed {
            name: library.name().to_string(),
            reason,
        })?;
        let mut libraries = self.libraries.write();
        let lib_index = libraries.len() as u32;
        library.register(lib_index, &self.callouts)?;
        debug!(name = library.name(), lib_index, "hook library loaded");
        libraries.push(library);
        Ok(())
    }

    /// unload every library in reverse load order
    pub fn unload_all(&self) {
        let mut libraries = self.libraries.write();
        for library in libraries.drain(..).rev() {
            if let Err(reason) = library.unload() {
                tracing::warn!(name = library.name(), reason, "library unload failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn handle_arguments_are_typed() {
        let mut handle = CalloutHandle::new();
        handle.set_argument("count", 41u32);
        assert_eq!(handle.get_argument::<u32>("count"), Some(&41));
        // wrong type stays put
        assert_eq!(handle.take_argument::<String>("count"), None);
        assert_eq!(handle.take_argument::<u32>("count"), Some(41));
        assert_eq!(handle.get_argument::<u32>("count"), None);
    }

    #[test]
    fn callouts_run_in_library_index_order() {
        let mgr = CalloutManager::new();
        let order = Arc::new(parking_lot::Mutex::new(vec![]));

        // register out of order on purpose
        for lib_index in [2u32, 0, 1] {
            let order = order.clone();
            mgr.register_callout(
                lib_index,
                HOOK_PKT4_RECEIVE,
                Arc::new(move |_handle| order.lock().push(lib_index)),
            )
            .unwrap();
        }
        let mut handle = CalloutHandle::new();
        assert_eq!(mgr.call(HOOK_PKT4_RECEIVE, &mut handle), NextStep::Continue);
        assert_eq!(&*order.lock(), &[0, 1, 2]);
    }

    #[test]
    fn drop_wins() {
        let mgr = CalloutManager::new();
        mgr.register_callout(
            0,
            HOOK_PKT4_RECEIVE,
            Arc::new(|handle| handle.set_next_step(NextStep::Drop)),
        )
        .unwrap();
        let mut handle = CalloutHandle::new();
        assert_eq!(mgr.call(HOOK_PKT4_RECEIVE, &mut handle), NextStep::Drop);
    }

    #[test]
    fn unknown_hook_is_an_error() {
        let mgr = CalloutManager::new();
        assert!(matches!(
            mgr.register_callout(0, "lease6_select", Arc::new(|_| {})),
            Err(Error::UnknownHook(_))
        ));
    }

    struct CountingLibrary {
        version: u32,
        loads: AtomicU32,
    }

    impl HookLibrary for CountingLibrary {
        fn name(&self) -> &str {
            "counting"
        }
        fn version(&self) -> u32 {
            self.version
        }
        fn load(&self, _params: &serde_json::Value) -> Result<(), String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn unload(&self) -> Result<(), String> {
            Ok(())
        }
        fn register(&self, lib_index: u32, callouts: &CalloutManager) -> Result<(), Error> {
            callouts.register_callout(lib_index, HOOK_PKT4_SEND, Arc::new(|_| {}))
        }
    }

    #[test]
    fn version_gate() {
        let mgr = HooksManager::new();
        let bad = Arc::new(CountingLibrary {
            version: HOOKS_API_VERSION + 1,
            loads: AtomicU32::new(0),
        });
        assert!(matches!(
            mgr.load_library(bad.clone(), &serde_json::Value::Null),
            Err(Error::VersionMismatch { got, .. }) if got == HOOKS_API_VERSION + 1
        ));
        assert_eq!(bad.loads.load(Ordering::SeqCst), 0);

        let good = Arc::new(CountingLibrary {
            version: HOOKS_API_VERSION,
            loads: AtomicU32::new(0),
        });
        mgr.load_library(good.clone(), &serde_json::Value::Null)
            .unwrap();
        assert_eq!(good.loads.load(Ordering::SeqCst), 1);
        assert!(mgr.callouts().has_callouts(HOOK_PKT4_SEND));
    }
}
