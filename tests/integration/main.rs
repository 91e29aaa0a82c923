//! Integration tests: full pipeline runs over scripted voters and a
//! scripted market feed, with no network access.

mod mock_feed;
mod pipeline;
