use chrono::Local;
use rusqlite::Connection;

/// Load the demo catalog: three genres, five authors, seven books and
/// eleven copies, cross-linked. Runs inside one transaction so a partial
/// dataset never survives a failure.
pub fn populate(conn: &Connection) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;

    for name in ["Fantasy", "Science Fiction", "French Poetry"] {
        tx.execute("INSERT INTO genres(name) VALUES(?)", [name])?;
    }

    let authors: [(&str, &str, Option<&str>, Option<&str>); 5] = [
        ("Patrick", "Rothfuss", Some("1973-06-06"), None),
        ("Ben", "Bova", Some("1932-11-07"), None),
        ("Isaac", "Asimov", Some("1920-01-02"), Some("1992-04-06")),
        ("Bob", "Billings", None, None),
        ("Jim", "Jones", Some("1971-12-16"), None),
    ];
    for (first, family, birth, death) in authors {
        tx.execute(
            "INSERT INTO authors(first_name, family_name, date_of_birth, date_of_death)
             VALUES(?, ?, ?, ?)",
            (first, family, birth, death),
        )?;
    }

    // (title, summary, isbn, author_id, genre_ids)
    let books: [(&str, &str, &str, i64, &[i64]); 7] = [
        (
            "The Name of the Wind (The Kingkiller Chronicle, #1)",
            "I have stolen princesses back from sleeping barrow kings. I burned down the town of Trebon. I have spent the night with Felurian and left with both my sanity and my life. I was expelled from the University at a younger age than most people are allowed in. I tread paths by moonlight that others fear to speak of during day. I have talked to Gods, loved women, and written songs that make the minstrels weep.",
            "9781473211896",
            1,
            &[1],
        ),
        (
            "The Wise Man's Fear (The Kingkiller Chronicle, #2)",
            "Picking up the tale of Kvothe Kingkiller once again, we follow him into exile, into political intrigue, courtship, adventure, love and magic... and further along the path that has turned Kvothe, the mightiest magician of his age, a legend in his own time, into Kote, the unassuming pub landlord.",
            "9788401352836",
            1,
            &[1],
        ),
        (
            "The Slow Regard of Silent Things (Kingkiller Chronicle)",
            "Deep below the University, there is a dark place. Few people know of it: a broken web of ancient passageways and abandoned rooms. A young woman lives there, tucked among the sprawling tunnels of the Underthing, snug in the heart of this forgotten place.",
            "9780756411336",
            1,
            &[1],
        ),
        (
            "Apes and Angels",
            "Humankind headed out to the stars not for conquest, nor exploration, nor even for curiosity. Humans went to the stars in a desperate crusade to save intelligent life wherever they found it. A wave of death is spreading through the Milky Way galaxy, an expanding sphere of lethal gamma ...",
            "9780765379528",
            2,
            &[2],
        ),
        (
            "Death Wave",
            "In Ben Bova's previous novel New Earth, Jordan Kell led the first human mission beyond the solar system. They discovered the ruins of an ancient alien civilization. But one alien AI survived, and it revealed to Jordan Kell that an explosion in the black hole at the heart of the Milky Way galaxy has created a wave of deadly radiation, expanding out from the core toward Earth. Unless the human race acts to save itself, all life on Earth will be wiped out...",
            "9780765379504",
            2,
            &[2],
        ),
        (
            "Test Book 1",
            "Summary of test book 1",
            "ISBN111111",
            5,
            &[1, 2],
        ),
        ("Test Book 2", "Summary of test book 2", "ISBN222222", 5, &[]),
    ];
    for (title, summary, isbn, author_id, genre_ids) in books {
        tx.execute(
            "INSERT INTO books(title, summary, isbn, author_id) VALUES(?, ?, ?, ?)",
            (title, summary, isbn, author_id),
        )?;
        let book_id = tx.last_insert_rowid();
        for genre_id in genre_ids {
            tx.execute(
                "INSERT INTO book_genres(book_id, genre_id) VALUES(?, ?)",
                (book_id, genre_id),
            )?;
        }
    }

    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    let instances: [(&str, &str, i64); 11] = [
        ("London Gollancz, 2014.", "Available", 1),
        (" Gollancz, 2011.", "Loaned", 2),
        (" Gollancz, 2015.", "Maintenance", 3),
        ("New York Tom Doherty Associates, 2016.", "Available", 4),
        ("New York Tom Doherty Associates, 2016.", "Available", 4),
        ("New York Tom Doherty Associates, 2016.", "Available", 4),
        ("New York, NY Tom Doherty Associates, LLC, 2015.", "Available", 5),
        ("New York, NY Tom Doherty Associates, LLC, 2015.", "Maintenance", 5),
        ("New York, NY Tom Doherty Associates, LLC, 2015.", "Loaned", 5),
        ("Imprint XXX2", "Maintenance", 1),
        ("Imprint XXX3", "Maintenance", 2),
    ];
    for (imprint, status, book_id) in instances {
        tx.execute(
            "INSERT INTO book_instances(imprint, status, due_back, book_id)
             VALUES(?, ?, ?, ?)",
            (imprint, status, &today, book_id),
        )?;
    }

    tx.commit()?;
    Ok(())
}
