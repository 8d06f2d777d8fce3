mod db;
mod derived;
mod ipc;
mod logger;
mod seed;
mod validate;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

fn main() {
    if let Err(e) = logger::init() {
        eprintln!("logger init failed: {e}");
    }

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    // LIBRARYD_WORKSPACE selects the catalog location up front;
    // LIBRARYD_SEED=1 rebuilds the schema and loads the demo dataset.
    if let Ok(dir) = std::env::var("LIBRARYD_WORKSPACE") {
        let seed = std::env::var("LIBRARYD_SEED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let path = PathBuf::from(&dir);
        match db::open_db(&path, seed) {
            Ok(conn) => {
                log::info!("workspace opened from environment: {}", path.display());
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => log::error!("unable to open workspace {}: {e:?}", path.display()),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; ignore.
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
