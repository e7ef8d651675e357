use std::sync::Arc;

use crate::scrape::Scraper;

#[derive(Clone)]
pub struct AppState {
    pub scraper: Arc<Scraper>,
}

impl AppState {
    pub fn new(scraper: Scraper) -> Self {
        Self {
            scraper: Arc::new(scraper),
        }
    }
}
