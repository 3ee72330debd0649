use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(sweep_home: Option<PathBuf>, config_dir: Option<PathBuf>) -> Option<PathBuf> {
    match sweep_home {
        Some(home) => Some(home.join(".env")),
        None => Some(config_dir?.join("month-sweep/.env")),
    }
}

/// `.env` in the working directory, else `$SWEEP_HOME/.env`, else the user
/// config dir. Variables already set in the process win.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("SWEEP_HOME").map(PathBuf::from),
        dirs::config_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}
