pub mod extract;
pub mod info;
pub mod list;
pub mod pack;

pub use extract::run as extract;
pub use info::run as info;
pub use list::run as list;
pub use pack::run as pack;
