use std::path::PathBuf;

pub const SERVER_TCP_PORT: u16 = 9797;

const SERVER_TCP_HOST: &str = "127.0.0.1";

pub fn server_address() -> String {
    format!("{}:{}", SERVER_TCP_HOST, SERVER_TCP_PORT)
}

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/airtime/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("airtime")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("airtime")
    }
}

pub fn config_dir() -> PathBuf {
    // On macOS and Linux, always use ~/.config/airtime/
    // (avoid macOS Application Support folder for consistency)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("airtime")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("airtime")
    }
}
