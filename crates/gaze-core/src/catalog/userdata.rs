//! Favorites and tags. User data: survives a derived-data wipe.

use super::Catalog;
use crate::catalog::types::now_ms;
use crate::error::Result;
use rusqlite::{params, OptionalExtension};

impl Catalog {
    pub fn set_media_favorite(&self, media_id: &str, favorite: bool) -> Result<()> {
        self.retry_busy(|conn| {
            if favorite {
                conn.execute(
                    "INSERT OR IGNORE INTO media_favorites (media_id, created_at_ms)
                     VALUES (?1, ?2)",
                    params![media_id, now_ms()],
                )
            } else {
                conn.execute(
                    "DELETE FROM media_favorites WHERE media_id = ?1",
                    params![media_id],
                )
            }
        })?;
        Ok(())
    }

    pub fn is_media_favorite(&self, media_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM media_favorites WHERE media_id = ?1",
                [media_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn set_person_favorite(&self, person_id: &str, favorite: bool) -> Result<()> {
        self.retry_busy(|conn| {
            if favorite {
                conn.execute(
                    "INSERT OR IGNORE INTO person_favorites (person_id, created_at_ms)
                     VALUES (?1, ?2)",
                    params![person_id, now_ms()],
                )
            } else {
                conn.execute(
                    "DELETE FROM person_favorites WHERE person_id = ?1",
                    params![person_id],
                )
            }
        })?;
        Ok(())
    }

    pub fn is_person_favorite(&self, person_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM person_favorites WHERE person_id = ?1",
                [person_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn add_media_tag(&self, media_id: &str, tag: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO media_tags (media_id, tag, created_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![media_id, tag, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn remove_media_tag(&self, media_id: &str, tag: &str) -> Result<bool> {
        let deleted = self.retry_busy(|conn| {
            conn.execute(
                "DELETE FROM media_tags WHERE media_id = ?1 AND tag = ?2",
                params![media_id, tag],
            )
        })?;
        Ok(deleted > 0)
    }

    pub fn list_media_tags(&self, media_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tag FROM media_tags WHERE media_id = ?1 ORDER BY created_at_ms",
        )?;
        let tags = stmt
            .query_map([media_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::seed_media;
    use crate::catalog::{Catalog, MediaType};

    #[test]
    fn test_media_favorite_toggle() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Photo);

        assert!(!catalog.is_media_favorite("m1").unwrap());
        catalog.set_media_favorite("m1", true).unwrap();
        catalog.set_media_favorite("m1", true).unwrap();
        assert!(catalog.is_media_favorite("m1").unwrap());
        catalog.set_media_favorite("m1", false).unwrap();
        assert!(!catalog.is_media_favorite("m1").unwrap());
    }

    #[test]
    fn test_tags_unique() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Photo);

        catalog.add_media_tag("m1", "holiday").unwrap();
        catalog.add_media_tag("m1", "holiday").unwrap();
        catalog.add_media_tag("m1", "family").unwrap();

        assert_eq!(catalog.list_media_tags("m1").unwrap().len(), 2);
        assert!(catalog.remove_media_tag("m1", "family").unwrap());
        assert!(!catalog.remove_media_tag("m1", "family").unwrap());
    }

    #[test]
    fn test_person_favorite() {
        let catalog = Catalog::open_in_memory().unwrap();
        let alice = catalog.create_person("Alice").unwrap();

        catalog.set_person_favorite(&alice, true).unwrap();
        assert!(catalog.is_person_favorite(&alice).unwrap());
    }
}
