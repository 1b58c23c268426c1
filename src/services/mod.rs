pub mod external_api;
pub mod model_import;
