pub mod defs;
pub mod view;

pub use defs::{Article, ScrapeSelectors, Source, SourceKind};
pub use view::{ConfigEdit, Effect, Transition, UiEvent, View, ViewContext};

// Object style note:
// Types in this crate cross the boundary between the aggregation core and
// its collaborators (terminal UI, config manager). They carry data only;
// behaviour lives in `news-aggregator`, except for the view state machine,
// which is pure and owned by the front end.
