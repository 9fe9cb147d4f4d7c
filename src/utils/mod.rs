pub mod errors;
pub mod logging;
pub mod privileges;
pub mod version;
