use rusqlite::Connection;
use std::path::Path;

use crate::seed;

/// Open (and sync) the catalog database inside a workspace directory.
/// With `reset_and_seed` the schema is rebuilt from scratch and the demo
/// dataset loaded; otherwise existing rows are kept.
pub fn open_db(workspace: &Path, reset_and_seed: bool) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("library.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    if reset_and_seed {
        drop_tables(&conn)?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS authors(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            family_name TEXT NOT NULL,
            date_of_birth TEXT,
            date_of_death TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS genres(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS books(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            isbn TEXT NOT NULL,
            author_id INTEGER,
            FOREIGN KEY(author_id) REFERENCES authors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_books_author ON books(author_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS book_genres(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL,
            genre_id INTEGER NOT NULL,
            UNIQUE(book_id, genre_id),
            FOREIGN KEY(book_id) REFERENCES books(id),
            FOREIGN KEY(genre_id) REFERENCES genres(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_genres_book ON book_genres(book_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_genres_genre ON book_genres(genre_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS book_instances(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            imprint TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Maintenance'
                CHECK(status IN ('Available', 'Maintenance', 'Loaned', 'Reserved')),
            due_back TEXT NOT NULL,
            book_id INTEGER,
            FOREIGN KEY(book_id) REFERENCES books(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_instances_book ON book_instances(book_id)",
        [],
    )?;

    if reset_and_seed {
        seed::populate(&conn)?;
    }

    Ok(conn)
}

fn drop_tables(conn: &Connection) -> anyhow::Result<()> {
    // Referencing tables first.
    conn.execute("DROP TABLE IF EXISTS book_genres", [])?;
    conn.execute("DROP TABLE IF EXISTS book_instances", [])?;
    conn.execute("DROP TABLE IF EXISTS books", [])?;
    conn.execute("DROP TABLE IF EXISTS genres", [])?;
    conn.execute("DROP TABLE IF EXISTS authors", [])?;
    Ok(())
}
