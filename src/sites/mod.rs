//! Built-in site adapters

pub mod alibaba;
pub mod baidu;
pub mod chinaso;
pub mod dogpile;

use crate::cli::config::SiteKind;
use crate::crawler::site::SiteAdapter;

pub use alibaba::Alibaba1688;
pub use baidu::{BaiduLazy, BaiduPaged};
pub use chinaso::Chinaso;
pub use dogpile::DogPile;

/// The adapter implementing a built-in site kind
pub fn adapter_for(kind: SiteKind) -> Box<dyn SiteAdapter> {
    match kind {
        SiteKind::BaiduLazy => Box::new(BaiduLazy),
        SiteKind::BaiduPaged => Box::new(BaiduPaged::default()),
        SiteKind::Dogpile => Box::new(DogPile::default()),
        SiteKind::Chinaso => Box::new(Chinaso::default()),
        SiteKind::Alibaba1688 => Box::new(Alibaba1688::default()),
    }
}
