mod table;

pub use table::{Mount, RouteTable};
