//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `config`  | `Config`         |
//! | `penalty` | `Penalty`        |
//! | `split`   | `Split`          |
//! | `demo`    | `Demo`           |

pub mod config;
pub mod demo;
pub mod penalty;
pub mod split;

pub use config::cmd_config;
pub use demo::cmd_demo;
pub use penalty::cmd_penalty;
pub use split::cmd_split;
