//! lumen-plugin-api - Plugin API for the lumen display calibration host
//!
//! This crate provides the traits and types needed to write lumen plugins.
//! Plugins are brought up in three phases by the registry, then assembled
//! into [`PluginChain`]s that share data through typed [`Dict`]s.
//!
//! # Example
//!
//! ```ignore
//! use lumen_plugin_api::{Dependencies, Plugin, PluginChain, PluginError, export_plugins};
//!
//! #[derive(Default)]
//! pub struct Gamma;
//!
//! impl Plugin for Gamma {
//!     fn name(&self) -> &str {
//!         "Gamma"
//!     }
//!
//!     fn check_deps(&mut self, deps: &mut dyn Dependencies) -> Result<(), PluginError> {
//!         deps.require_attributes(&["Sensor"])?;
//!         Ok(())
//!     }
//!
//!     fn run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
//!         chain.set_ui_string("Gamma::status", "measuring");
//!         Ok(())
//!     }
//! }
//!
//! export_plugins!(c"Gamma" => Gamma);
//! ```

pub mod capability;
pub mod chain;
pub mod descriptor;
pub mod dict;
pub mod dict_hash;
pub mod error;
pub mod handle;
pub mod item;
pub mod sync;
pub mod xml;

pub use capability::{Ddc, Measurement, Sensor, Ui};
pub use chain::{FailurePolicy, PluginChain, RunStage, SharedLookup};
pub use descriptor::PluginDescriptor;
pub use dict::{Dict, ItemFactory};
pub use dict_hash::{DictHash, DictHashPlugin, SharedDict};
pub use error::{ChainError, DictError, LifecycleError, PluginError, StageFailure};
pub use handle::{
    BringUpStage, Dependencies, LifecycleState, PluginHandle, PluginLookup, PluginRef,
};
pub use item::DictItem;
pub use tokio_util::sync::CancellationToken;

/// Current plugin API version. Modules must match this exactly.
/// This is checked before any descriptor is read.
pub const API_VERSION: u32 = 1;

/// The core plugin trait - implement this to create a lumen plugin.
///
/// Every step has a default no-op implementation, so plugins only need to
/// override the ones they care about. Bring-up calls `post_load`,
/// `check_deps` and `post_check_deps` once each, in that order; a plugin
/// that fails any of them is never run.
pub trait Plugin: Send {
    /// Unique name used for lookups
    fn name(&self) -> &str;

    /// Capability attributes, see [`capability`]
    fn attributes(&self) -> Vec<String> {
        Vec::new()
    }

    // ─── Bring-up ────────────────────────────────────────────────────

    /// Self-contained setup. No other plugin may be touched here.
    fn post_load(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Locate collaborators. Anything returned by `deps` has itself passed
    /// its dependency check.
    fn check_deps(&mut self, _deps: &mut dyn Dependencies) -> Result<(), PluginError> {
        Ok(())
    }

    /// Final setup once every dependency check has settled
    fn post_check_deps(&mut self, _lookup: &dyn PluginLookup) -> Result<(), PluginError> {
        Ok(())
    }

    // ─── Chain execution ─────────────────────────────────────────────

    fn pre_run(&mut self, _chain: &PluginChain) -> Result<(), PluginError> {
        Ok(())
    }

    /// Do the work. Long operations should poll
    /// [`PluginChain::was_cancelled`] and return [`PluginError::Cancelled`].
    fn run(&mut self, _chain: &PluginChain) -> Result<(), PluginError> {
        Ok(())
    }

    /// Always called after `pre_run`, even if the chain failed or was
    /// cancelled
    fn post_run(&mut self, _chain: &PluginChain) -> Result<(), PluginError> {
        Ok(())
    }

    // ─── Typed capabilities ──────────────────────────────────────────

    fn as_ui(&mut self) -> Option<&mut dyn Ui> {
        None
    }

    fn as_sensor(&mut self) -> Option<&mut dyn Sensor> {
        None
    }

    fn as_ddc(&mut self) -> Option<&mut dyn Ddc> {
        None
    }
}

/// Export plugin types for dynamic loading.
///
/// This macro generates the C ABI entry points the registry looks up when
/// it opens a module, plus a static descriptor table. Descriptor versions
/// come from the exporting crate's package version.
///
/// # Usage
///
/// ```ignore
/// lumen_plugin_api::export_plugins!(c"Gamma" => Gamma, c"Lut" => Lut);
///
/// // With plugin-defined dict item types
/// lumen_plugin_api::export_plugins!(
///     items = (create_item, lumen_plugin_api::descriptor::destroy_item);
///     c"FakeSensor" => FakeSensor,
/// );
/// ```
///
/// # Generated Functions
///
/// - `_lumen_plugin_api_version()`: Returns the API version
/// - `_lumen_register_plugins(count)`: Returns the descriptor table and
///   writes its length to `count`
#[macro_export]
macro_rules! export_plugins {
    (@emit $item_create:expr, $item_destroy:expr; $($name:literal => $plugin_type:ty),+) => {
        static _LUMEN_PLUGINS: &[$crate::descriptor::PluginDescriptor] = &[
            $(
                $crate::descriptor::PluginDescriptor {
                    item_create: $item_create,
                    item_destroy: $item_destroy,
                    ..$crate::descriptor::PluginDescriptor::new::<$plugin_type>(
                        $name,
                        $crate::descriptor::parse_version(env!("CARGO_PKG_VERSION_MAJOR")),
                        $crate::descriptor::parse_version(env!("CARGO_PKG_VERSION_MINOR")),
                    )
                }
            ),+
        ];

        #[unsafe(no_mangle)]
        pub extern "C" fn _lumen_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _lumen_register_plugins(
            count: *mut usize,
        ) -> *const $crate::descriptor::PluginDescriptor {
            if !count.is_null() {
                unsafe {
                    *count = _LUMEN_PLUGINS.len();
                }
            }
            _LUMEN_PLUGINS.as_ptr()
        }
    };
    (items = ($item_create:path, $item_destroy:path); $($name:literal => $plugin_type:ty),+ $(,)?) => {
        $crate::export_plugins!(
            @emit
            Some($item_create as $crate::descriptor::CreateItemFn),
            Some($item_destroy as $crate::descriptor::DestroyItemFn);
            $($name => $plugin_type),+
        );
    };
    ($($name:literal => $plugin_type:ty),+ $(,)?) => {
        $crate::export_plugins!(@emit None, None; $($name => $plugin_type),+);
    };
}
