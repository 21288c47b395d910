pub mod config_io;
pub mod error;
pub mod model_io;

pub use config_io::{config_from_str, load_config, save_config};
pub use error::{IoError, IoResult};
pub use model_io::{load_weights, save_weights, ModelWeights};
