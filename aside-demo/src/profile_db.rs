use shared::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    pub id: u64,
    pub display_name: String,
}

/// Stand-in for the authoritative data source, with a little latency per query.
pub struct ProfileDb {
    rows: RwLock<HashMap<u64, Profile>>,
    queries: AtomicUsize,
    latency: Duration,
}

impl ProfileDb {
    pub fn seeded() -> Self {
        let rows = [(1, "Ada Lovelace"), (2, "Grace Hopper")]
            .into_iter()
            .map(|(id, name)| {
                (
                    id,
                    Profile {
                        id,
                        display_name: name.to_string(),
                    },
                )
            })
            .collect();

        Self {
            rows: RwLock::new(rows),
            queries: AtomicUsize::new(0),
            latency: Duration::from_millis(20),
        }
    }

    pub async fn find(&self, id: u64) -> Result<Option<Profile>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(self.rows.read().await.get(&id).cloned())
    }

    /// Returns whether a row was updated.
    pub async fn rename(&self, id: u64, display_name: &str) -> Result<bool> {
        tokio::time::sleep(self.latency).await;
        match self.rows.write().await.get_mut(&id) {
            Some(row) => {
                row.display_name = display_name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}
