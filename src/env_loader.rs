use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(
    fieldstage_home: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(home) = fieldstage_home {
        return Some(home.join(".env"));
    }
    Some(home_dir?.join("fieldstage/.env"))
}

/// Load `.env` from the working directory, falling back to
/// `$FIELDSTAGE_HOME/.env` and then `~/fieldstage/.env`. Variables already in
/// the environment win.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("FIELDSTAGE_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}
