pub mod predicate;
pub mod router;

pub use predicate::PathPattern;
pub use router::{Route, RouteFilter, RouteMatch, RouteTable, RouteTableBuilder, RewrittenPath};
