//! Plugins compiled into lumen itself
//!
//! - [`DictHashPlugin`](lumen_plugin_api::DictHashPlugin): owns the named dicts
//!   and copies entries between them
//! - [`DataSavior`]: XML persistence and calibration records

mod data_savior;

pub use data_savior::{
    CALIB_RECORD_TYPE, CalibRecordFactory, CalibRecordItem, DataSavior, LOAD_FILE_KEY,
    RECORD_KEYS_KEY, RECORD_NAME_KEY, SAVE_FILE_KEY, SOURCE_DICT_KEY,
};
