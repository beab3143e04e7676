//! Read-only / read-write connection pair.

use crate::config::MySqlConfig;
use crate::db::connection::DbConnection;
use crate::db::mysql::MySqlConnection;

/// Holds one read-only and one read-write connection and hands out the one a
/// caller asks for.
pub struct ConnectionFactory<C = MySqlConnection> {
    read_only: C,
    read_write: C,
}

impl<C: DbConnection> ConnectionFactory<C> {
    pub fn new(read_only: C, read_write: C) -> Self {
        Self {
            read_only,
            read_write,
        }
    }

    /// The read-only connection when `read_only` is set, else the read-write one.
    pub fn get(&mut self, read_only: bool) -> &mut C {
        if read_only {
            self.get_read_only()
        } else {
            self.get_read_write()
        }
    }

    pub fn get_read_only(&mut self) -> &mut C {
        &mut self.read_only
    }

    pub fn get_read_write(&mut self) -> &mut C {
        &mut self.read_write
    }

    /// Disconnect both connections.
    pub async fn disconnect_all(&mut self) {
        self.read_only.disconnect().await;
        self.read_write.disconnect().await;
    }
}

impl ConnectionFactory<MySqlConnection> {
    /// Build lazily connecting MySQL connections from two descriptors.
    pub fn mysql(read_only: MySqlConfig, read_write: MySqlConfig) -> Self {
        Self::new(
            MySqlConnection::from_config(read_only),
            MySqlConnection::from_config(read_write),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessConfig, ConnectionOptions};

    fn config(name: &str) -> MySqlConfig {
        MySqlConfig::new(
            AccessConfig::new("localhost", "app", "", 3306),
            ConnectionOptions::new(name),
            "shop",
        )
    }

    #[test]
    fn test_get_selects_connection() {
        let mut factory = ConnectionFactory::mysql(config("read"), config("write"));
        assert_eq!(factory.get(true).inner().connection_name(), "read");
        assert_eq!(factory.get(false).inner().connection_name(), "write");
        assert!(!factory.get_read_write().is_connected());
    }
}
