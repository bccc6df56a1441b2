//! Tools the DeckAgent roles can call.

mod web_search;

pub use web_search::{
    GoogleSearch, SearchBackend, SearchError, SearchHit, WebSearchParameters,
    WebSearchTool,
};
