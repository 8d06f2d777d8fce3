pub mod authors;
pub mod book_instances;
pub mod books;
pub mod core;
pub mod genres;
