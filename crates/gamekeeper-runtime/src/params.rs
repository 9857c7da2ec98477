//! Launch parameter assembly for game server processes.
//!
//! The game executable takes almost all of its per-instance configuration
//! through a single `-execute` argument: a semicolon-joined list of
//! `Set key value` console commands. Everything here is pure so the exact
//! argument vector is unit-testable without spawning anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gamekeeper_core::{HonData, SpawnSpec};

/// Proxy ports sit one block above their real counterparts.
pub const PROXY_PORT_OFFSET: u16 = 10_000;

/// Identity and placement of one instance, as the launcher needs it.
#[derive(Debug, Clone)]
pub struct LaunchIdentity {
    /// 1-based stable ordinal; embedded in the server's self-announced
    /// login and display name.
    pub ordinal: usize,
    pub game_port: u16,
    pub cpu_affinity: Vec<usize>,
}

/// Voice port paired with a game port: same offset from the respective
/// starting ports.
pub fn voice_port(hon: &HonData, game_port: u16) -> u16 {
    let offset = game_port.saturating_sub(hon.starting_game_port);
    hon.starting_voice_port + offset
}

/// Platform-conventional server executable name when the config leaves it
/// empty.
pub fn default_executable() -> &'static str {
    if cfg!(windows) { "hon_x64.exe" } else { "hon_x64" }
}

/// Format a core list for the `host_affinity` console variable; `-1`
/// means unpinned.
pub fn format_affinity(cores: &[usize]) -> String {
    if cores.is_empty() {
        return "-1".to_string();
    }
    cores
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the complete spawn spec for one instance.
pub fn build_spawn_spec(hon: &HonData, identity: &LaunchIdentity) -> SpawnSpec {
    let exe_name = if hon.executable_name.is_empty() {
        default_executable().to_string()
    } else {
        hon.executable_name.clone()
    };
    let executable = Path::new(&hon.install_directory).join(exe_name);

    SpawnSpec {
        executable,
        args: build_args(hon, identity),
        work_dir: PathBuf::from(&hon.install_directory),
        env_overrides: build_env_overrides(hon),
        port: identity.game_port,
    }
}

/// Per-instance filesystem isolation: the two conventional "user home" and
/// "application data" variables are rewritten so every process reads and
/// writes its own config/artefact root. Everything else is inherited.
pub fn build_env_overrides(hon: &HonData) -> HashMap<String, String> {
    let mut env = HashMap::new();

    let artefacts = if hon.artefacts_directory.is_empty() {
        &hon.install_directory
    } else {
        &hon.artefacts_directory
    };
    let home = if hon.home_directory.is_empty() {
        &hon.install_directory
    } else {
        &hon.home_directory
    };

    env.insert("APPDATA".to_string(), artefacts.clone());
    env.insert("USERPROFILE".to_string(), home.clone());
    env
}

/// Argument vector: mode flags, the `-execute` blob, the master service
/// address, and the register callback pointing at the control listener.
pub fn build_args(hon: &HonData, identity: &LaunchIdentity) -> Vec<String> {
    let mut args: Vec<String> = vec!["-dedicated".to_string()];

    if cfg!(windows) {
        args.push("-mod".to_string());
        args.push("game;KONGOR".to_string());
        if hon.no_console {
            args.push("-noconsole".to_string());
        }
    } else {
        args.push("-mod game;KONGOR".to_string());
    }

    args.push("-noconfig".to_string());

    args.push("-execute".to_string());
    let params = build_execute_params(hon, identity);
    if cfg!(windows) {
        args.push(params);
    } else {
        args.push(format!("\"{params}\""));
    }

    args.push("-masterserver".to_string());
    args.push(if hon.master_server_url.is_empty() {
        "api.kongor.net".to_string()
    } else {
        hon.master_server_url.clone()
    });

    args.push("-register".to_string());
    args.push(format!("127.0.0.1:{}", hon.manager_port));

    args
}

/// The semicolon-joined `Set key value` list passed through `-execute`.
pub fn build_execute_params(hon: &HonData, identity: &LaunchIdentity) -> String {
    let port = identity.game_port;
    let voice_local = voice_port(hon, port);

    let (proxy_port, voice_remote) = if hon.enable_proxy {
        (port + PROXY_PORT_OFFSET, voice_local + PROXY_PORT_OFFSET)
    } else {
        (port, voice_local)
    };

    let affinity = format_affinity(&identity.cpu_affinity);

    let mut params: Vec<(&str, String)> = vec![
        ("svr_login", format!("{}:{}", hon.login, identity.ordinal)),
        ("svr_password", hon.password.clone()),
        ("svr_description", format!("priority:normal,cores:{affinity}")),
        ("sv_masterName", format!("{}:", hon.login)),
        ("svr_slave", identity.ordinal.to_string()),
        ("svr_name", format!("{} {} 0", hon.name, identity.ordinal)),
        ("svr_ip", hon.ip.clone()),
        ("svr_port", port.to_string()),
        ("svr_proxyPort", proxy_port.to_string()),
        ("svr_proxyLocalVoicePort", voice_local.to_string()),
        ("svr_proxyRemoteVoicePort", voice_remote.to_string()),
        ("svr_voicePortStart", voice_local.to_string()),
        ("man_enableProxy", hon.enable_proxy.to_string()),
        ("svr_location", hon.location.clone()),
        ("svr_broadcast", "true".to_string()),
        ("upd_checkForUpdates", "false".to_string()),
        ("sv_autosaveReplay", "true".to_string()),
        ("sys_autoSaveDump", "false".to_string()),
        ("sys_dumpOnFatal", "false".to_string()),
        ("svr_chatPort", chat_port(hon).to_string()),
        ("svr_maxIncomingPacketsPerSecond", "300".to_string()),
        ("svr_maxIncomingBytesPerSecond", "1048576".to_string()),
        ("con_showNet", "false".to_string()),
        ("svr_submitStats", "true".to_string()),
        ("svr_chatAddress", chat_address(hon)),
        ("http_useCompression", "false".to_string()),
        ("man_resubmitStats", "true".to_string()),
        ("man_uploadReplays", "true".to_string()),
        ("man_enableBotMatch", hon.allow_bot_matches.to_string()),
    ];

    // With override-affinity the pin happens post-launch through the OS,
    // so the console variable is left out on that family.
    if !(cfg!(windows) && hon.override_affinity) {
        params.push(("host_affinity", affinity));
    }

    params
        .into_iter()
        .map(|(key, value)| format!("Set {key} {value}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn chat_address(hon: &HonData) -> String {
    if hon.chat_address.is_empty() {
        "96.127.149.202".to_string()
    } else {
        hon.chat_address.clone()
    }
}

fn chat_port(hon: &HonData) -> u16 {
    if hon.chat_port == 0 { 11032 } else { hon.chat_port }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hon() -> HonData {
        HonData {
            install_directory: "/opt/hon".to_string(),
            login: "operator".to_string(),
            password: "secret".to_string(),
            name: "Test Server".to_string(),
            ip: "203.0.113.9".to_string(),
            starting_game_port: 11235,
            starting_voice_port: 11335,
            manager_port: 1134,
            ..HonData::default()
        }
    }

    fn identity() -> LaunchIdentity {
        LaunchIdentity {
            ordinal: 3,
            game_port: 11237,
            cpu_affinity: vec![1],
        }
    }

    #[test]
    fn voice_port_tracks_game_port_offset() {
        assert_eq!(voice_port(&hon(), 11235), 11335);
        assert_eq!(voice_port(&hon(), 11237), 11337);
    }

    #[test]
    fn execute_params_carry_identity_and_ports() {
        let params = build_execute_params(&hon(), &identity());
        assert!(params.contains("Set svr_login operator:3"));
        assert!(params.contains("Set svr_slave 3"));
        assert!(params.contains("Set svr_name Test Server 3 0"));
        assert!(params.contains("Set svr_port 11237"));
        assert!(params.contains("Set svr_voicePortStart 11337"));
        assert!(params.contains("Set man_enableProxy false"));
        // No proxy: the proxy port equals the real port.
        assert!(params.contains("Set svr_proxyPort 11237"));
    }

    #[test]
    fn proxy_flag_shifts_public_ports() {
        let mut hon = hon();
        hon.enable_proxy = true;
        let params = build_execute_params(&hon, &identity());
        assert!(params.contains("Set svr_proxyPort 21237"));
        assert!(params.contains("Set svr_proxyLocalVoicePort 11337"));
        assert!(params.contains("Set svr_proxyRemoteVoicePort 21337"));
        assert!(params.contains("Set man_enableProxy true"));
    }

    #[test]
    fn args_end_with_register_callback() {
        let args = build_args(&hon(), &identity());
        assert_eq!(args[0], "-dedicated");
        assert!(args.contains(&"-noconfig".to_string()));
        assert!(args.contains(&"-masterserver".to_string()));
        assert!(args.contains(&"api.kongor.net".to_string()));
        let register = args.iter().position(|a| a == "-register").unwrap();
        assert_eq!(args[register + 1], "127.0.0.1:1134");
    }

    #[cfg(unix)]
    #[test]
    fn unix_execute_blob_is_quote_wrapped() {
        let args = build_args(&hon(), &identity());
        let execute = args.iter().position(|a| a == "-execute").unwrap();
        let blob = &args[execute + 1];
        assert!(blob.starts_with('"') && blob.ends_with('"'));
        assert!(args.contains(&"-mod game;KONGOR".to_string()));
    }

    #[test]
    fn affinity_formats_as_comma_list() {
        assert_eq!(format_affinity(&[]), "-1");
        assert_eq!(format_affinity(&[0]), "0");
        assert_eq!(format_affinity(&[2, 3]), "2,3");
    }

    #[test]
    fn spawn_spec_isolates_per_instance_directories() {
        let mut hon = hon();
        hon.home_directory = "/data/home3".to_string();
        hon.artefacts_directory = "/data/artefacts3".to_string();

        let spec = build_spawn_spec(&hon, &identity());
        assert_eq!(spec.env_overrides["USERPROFILE"], "/data/home3");
        assert_eq!(spec.env_overrides["APPDATA"], "/data/artefacts3");
        assert_eq!(spec.work_dir, PathBuf::from("/opt/hon"));
        assert_eq!(spec.port, 11237);
        assert!(spec.executable.ends_with(default_executable()));
    }

    #[test]
    fn empty_directories_fall_back_to_install_dir() {
        let env = build_env_overrides(&hon());
        assert_eq!(env["USERPROFILE"], "/opt/hon");
        assert_eq!(env["APPDATA"], "/opt/hon");
    }
}
