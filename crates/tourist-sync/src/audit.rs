//! Checks that club wiki links point at pools in the club's own place.

use serde::Serialize;

use tourist_core::{wiki_links, EntityKind};
use tourist_storage::EntityStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkCheck {
    pub club: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkAudit {
    pub good: Vec<LinkCheck>,
    pub not_found: Vec<LinkCheck>,
    pub different_place: Vec<LinkCheck>,
}

impl LinkAudit {
    pub fn is_clean(&self) -> bool {
        self.not_found.is_empty() && self.different_place.is_empty()
    }
}

pub fn audit_club_pool_links(store: &dyn EntityStore) -> LinkAudit {
    let mut audit = LinkAudit::default();
    for club in store.all_of_kind(EntityKind::Club) {
        for target in wiki_links(&club.markdown) {
            let check = LinkCheck {
                club: club.short_name.clone(),
                target,
            };
            match store.find_by_short_name(&check.target) {
                Some(pool) if pool.kind() == EntityKind::Pool => {
                    if pool.parent.id == club.parent.id {
                        audit.good.push(check);
                    } else {
                        audit.different_place.push(check);
                    }
                }
                _ => audit.not_found.push(check),
            }
        }
    }
    audit
}
