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
    const DISPLAY_ENVS: [&str; 18] = [
        "RUST_LOG",
        "ESG_HOST",
        "ESG_PORT",
        "ESG_DATABASE_URL",
        "ESG_DEFAULT_COMMISSION_BPS",
        "ESG_STORE_COMMISSION_BPS",
        "ESG_HOLD_PERIOD_DAYS",
        "ESG_AUTO_RELEASE_INTERVAL_SECS",
        "ESG_AUTO_RELEASE_BATCH_SIZE",
        "ESG_EXTERNAL_CALL_TIMEOUT_SECS",
        "ESG_WEBHOOK_HMAC_CHECKS",
        "ESG_WEBHOOK_IP_WHITELIST",
        "ESG_USE_X_FORWARDED_FOR",
        "ESG_USE_FORWARDED",
        "ESG_ACTOR_ROLES",
        "ESG_PAYMENT_GATEWAY_URL",
        "ESG_BALANCE_LEDGER_URL",
        "ESG_NOTIFICATION_URL",
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
