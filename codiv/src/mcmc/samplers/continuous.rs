pub mod mixers;
pub mod scalers;
pub mod window;
