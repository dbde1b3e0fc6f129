use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Reader/writer lock per normalized table name.
///
/// Structural changes take the write side; inserts and listings take the read
/// side, so no row is read or written against a table that is mid-rebuild.
/// An entry only lives while some guard or waiter holds it.
#[derive(Default)]
pub struct TableLocks {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

/// Held lock on one table; releasing the last one forgets the table's entry.
pub struct TableGuard<'a, G> {
    locks: &'a TableLocks,
    table: String,
    guard: Option<G>,
}

pub type TableReadGuard<'a> = TableGuard<'a, OwnedRwLockReadGuard<()>>;
pub type TableWriteGuard<'a> = TableGuard<'a, OwnedRwLockWriteGuard<()>>;

impl<G> Drop for TableGuard<'_, G> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.table);
    }
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, table: &str) -> Arc<RwLock<()>> {
        self.locks.entry(table.to_string()).or_default().clone()
    }

    // The map holds one reference; any other belongs to a guard or a waiter.
    fn release(&self, table: &str) {
        self.locks.remove_if(table, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub async fn read(&self, table: &str) -> TableReadGuard<'_> {
        let guard = self.lock_for(table).read_owned().await;
        TableGuard {
            locks: self,
            table: table.to_string(),
            guard: Some(guard),
        }
    }

    pub async fn write(&self, table: &str) -> TableWriteGuard<'_> {
        let guard = self.lock_for(table).write_owned().await;
        TableGuard {
            locks: self,
            table: table.to_string(),
            guard: Some(guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn readers_share_writers_exclude() {
        let locks = Arc::new(TableLocks::new());
        let r1 = locks.read("people").await;
        let r2 = locks.read("people").await;

        let pending = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _w = locks.write("people").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        // Other tables are unaffected.
        let _other = tokio::time::timeout(Duration::from_millis(100), locks.write("orders"))
            .await
            .expect("lock on another table should be free");

        drop(r1);
        drop(r2);
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("writer should proceed once readers are gone")
            .unwrap();
    }

    #[tokio::test]
    async fn entries_are_dropped_with_their_last_guard() {
        let locks = TableLocks::new();
        for name in ["ghosts", "phantoms", "ghosts"] {
            let _guard = locks.read(name).await;
            assert!(locks.locks.contains_key(name));
        }
        assert!(locks.locks.is_empty());

        let r1 = locks.read("people").await;
        let r2 = locks.read("people").await;
        drop(r1);
        assert!(locks.locks.contains_key("people"));
        drop(r2);
        assert!(locks.locks.is_empty());
    }

    #[tokio::test]
    async fn waiting_writer_keeps_the_entry_alive() {
        let locks = Arc::new(TableLocks::new());
        let reader = locks.read("people").await;

        let pending = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _w = locks.write("people").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(reader);
        assert!(locks.locks.contains_key("people") || pending.is_finished());

        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("writer should get the lock the reader released")
            .unwrap();
        assert!(locks.locks.is_empty());
    }
}
