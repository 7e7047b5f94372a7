//! Optional process-wide install of the interceptors.
//!
//! Nothing in the crate reads these slots; they exist for hosts that look up
//! "the current fetch" or "the current request factory" by name instead of
//! receiving one by injection. Restoring an installed adapter puts back
//! whatever occupied the slot before it, provided nothing replaced it since.

use std::sync::Arc;

use parking_lot::{const_rwlock, RwLock};

use crate::config::TunnelConfig;
use crate::fetch::TunnelFetch;
use crate::http::Fetch;
use crate::rpc::RpcClient;
use crate::xhr::XhrFactory;

static FETCH: RwLock<Option<Arc<dyn Fetch>>> = const_rwlock(None);
static XHR: RwLock<Option<XhrFactory>> = const_rwlock(None);

pub fn global_fetch() -> Option<Arc<dyn Fetch>> {
    FETCH.read().clone()
}

/// Replaces the fetch slot, returning the previous occupant.
pub fn set_global_fetch(fetch: Option<Arc<dyn Fetch>>) -> Option<Arc<dyn Fetch>> {
    std::mem::replace(&mut *FETCH.write(), fetch)
}

pub fn global_xhr_factory() -> Option<XhrFactory> {
    XHR.read().clone()
}

/// Replaces the request-factory slot, returning the previous occupant.
pub fn set_global_xhr_factory(factory: Option<XhrFactory>) -> Option<XhrFactory> {
    std::mem::replace(&mut *XHR.write(), factory)
}

/// Builds a [`TunnelFetch`] and, if `config.install_global` is set,
/// publishes it in the fetch slot. Restoring its handle reinstates the
/// previous occupant, or `native` if the slot was empty.
pub fn install_fetch(native: Arc<dyn Fetch>, rpc: Arc<dyn RpcClient>, config: TunnelConfig) -> Arc<TunnelFetch> {
    let install = config.install_global;
    let fetch = Arc::new(TunnelFetch::new(native.clone(), rpc, config));
    if !install {
        return fetch;
    }

    let published: Arc<dyn Fetch> = fetch.clone();
    let previous = set_global_fetch(Some(published)).unwrap_or(native);
    let installed = Arc::downgrade(&fetch);
    fetch.handle().on_restore(move || {
        let mut slot = FETCH.write();
        let still_ours = slot
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), installed.as_ptr()));
        if still_ours {
            *slot = Some(previous);
        }
    });
    tracing::debug!("tunnelling fetch installed globally");
    fetch
}

/// Builds an [`XhrFactory`] and, if `config.install_global` is set,
/// publishes it in the request-factory slot.
pub fn install_xhr(native: Arc<dyn Fetch>, rpc: Arc<dyn RpcClient>, config: TunnelConfig) -> XhrFactory {
    let install = config.install_global;
    let factory = XhrFactory::new(native, rpc, config);
    if !install {
        return factory;
    }

    let previous = set_global_xhr_factory(Some(factory.clone()));
    let installed = factory.downgrade();
    factory.handle().on_restore(move || {
        let mut slot = XHR.write();
        if slot.as_ref().is_some_and(|current| current.is(&installed)) {
            *slot = previous;
        }
    });
    tracing::debug!("tunnelling request factory installed globally");
    factory
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::abort::AbortSignal;
    use crate::error::Result;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::rpc::{ToolCall, ToolResult};

    struct Teapot;

    #[async_trait]
    impl Fetch for Teapot {
        async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse::new(418))
        }
    }

    struct NoTools;

    #[async_trait]
    impl RpcClient for NoTools {
        async fn call_tool(&self, _call: ToolCall, _signal: Option<AbortSignal>) -> Result<ToolResult> {
            Ok(ToolResult::error("no tools"))
        }

        fn is_tool_available(&self, _name: &str) -> bool {
            false
        }
    }

    // The slots are process-wide, so every slot assertion lives in this one test.
    #[test]
    fn install_and_restore_round_trip() {
        let native: Arc<dyn Fetch> = Arc::new(Teapot);
        let rpc: Arc<dyn RpcClient> = Arc::new(NoTools);

        let local = install_fetch(native.clone(), rpc.clone(), TunnelConfig::default().with_install_global(false));
        assert!(global_fetch().is_none());
        drop(local);

        let fetch = install_fetch(native.clone(), rpc.clone(), TunnelConfig::default());
        let current = global_fetch().unwrap();
        assert!(std::ptr::addr_eq(Arc::as_ptr(&current), Arc::as_ptr(&fetch)));

        fetch.handle().restore();
        let restored = global_fetch().unwrap();
        assert!(Arc::ptr_eq(&restored, &native));
        assert!(!fetch.handle().is_active());

        let factory = install_xhr(native.clone(), rpc.clone(), TunnelConfig::default());
        assert!(global_xhr_factory().is_some_and(|f| f.is(&factory.downgrade())));
        let replacement = XhrFactory::new(native, rpc, TunnelConfig::default());
        set_global_xhr_factory(Some(replacement.clone()));
        factory.handle().restore();
        assert!(global_xhr_factory().is_some_and(|f| f.is(&replacement.downgrade())));

        set_global_fetch(None);
        set_global_xhr_factory(None);
    }
}
