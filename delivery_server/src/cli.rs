use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 13] = [
        "RUST_LOG",
        "DLV_HOST",
        "DLV_PORT",
        "DLV_DATABASE_URL",
        "DLV_COMMISSION_BPS",
        "DLV_COURIER_FEE_SHARE_BPS",
        "DLV_COURIER_PAYOUT_FLOOR",
        "DLV_RESTAURANT_PAYOUT_FLOOR",
        "DLV_REMITTANCE_TOLERANCE",
        "DLV_UNACCEPTED_ORDER_TIMEOUT",
        "DLV_ROLLUP_INTERVAL_HOURS",
        "DLV_RETRY_MAX_ATTEMPTS",
        "DLV_RUN_WORKERS",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
