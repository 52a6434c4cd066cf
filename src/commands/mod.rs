//! CLI command implementations
//!
//! The build targets (`build`, `size`, `upload`, `uploadlazy`) all go through
//! [`samflash_core::upload::Pipeline`]; the remaining commands only inspect
//! the board database and the host's serial ports.

mod flags;
mod list;
mod target;

pub use flags::print_flags;
pub use list::{list_boards, list_ports};
pub use target::run_target;
