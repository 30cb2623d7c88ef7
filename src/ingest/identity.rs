use std::collections::HashMap;

use crate::constants::SYNTHETIC_USER_ID_FLOOR;
use crate::parse::Poster;

/// Hands out synthetic user ids to posters without a profile link.
///
/// Ids are stable for the lifetime of one resolver; a fresh run over the same
/// sorted input assigns the same ids, but nothing is persisted between runs.
#[derive(Debug)]
pub struct IdentityResolver {
    assigned: HashMap<String, i64>,
    next_id: i64,
}

impl IdentityResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            assigned: HashMap::new(),
            next_id: SYNTHETIC_USER_ID_FLOOR,
        }
    }

    /// The id for `name`, assigning the next free one on first sight.
    pub fn resolve(&mut self, name: &str) -> i64 {
        if let Some(&id) = self.assigned.get(name) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.assigned.insert(name.to_string(), id);
        id
    }

    /// The id to store for a poster: the site's own id when it has one.
    pub fn user_id(&mut self, poster: &Poster) -> i64 {
        match poster {
            Poster::Registered { id, .. } => *id,
            Poster::Anonymous { name } => self.resolve(name),
        }
    }

    /// How many synthetic ids have been assigned.
    #[must_use]
    pub fn assigned_count(&self) -> usize {
        self.assigned.len()
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}
