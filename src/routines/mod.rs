// Reading the input dataset
pub mod data;
// Routines for logging
pub mod logger;
// Routines for output
pub mod output;
// Routines for settings
pub mod settings;
