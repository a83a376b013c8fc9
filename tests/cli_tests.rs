#[cfg(test)]
mod tests {
    use clap::Parser;
    use midiplex::cli::{validate_destination, validate_sources, Args, Command};
    use midiplex::{Endpoint, EngineConfig, InputSource, OutputDestination, ProviderKind};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn offered() -> HashSet<InputSource> {
        [
            InputSource::new(ProviderKind::Port, &Endpoint::new(1, "Mock Device 1")),
            InputSource::new(ProviderKind::Port, &Endpoint::new(2, "Mock Device 2")),
            InputSource::new(ProviderKind::Spy, &Endpoint::new(3, "Synth")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_args_list() {
        let args = Args::parse_from(["midiplex", "list"]);
        assert_eq!(args.command, Command::List);
        assert!(!args.verbose);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_args_monitor_with_sources() {
        let args = Args::parse_from([
            "midiplex",
            "monitor",
            "--source",
            "Mock Device 1",
            "--source",
            "Synth",
            "--verbose",
        ]);
        assert!(args.verbose);
        assert_eq!(
            args.command,
            Command::Monitor {
                sources: vec!["Mock Device 1".to_string(), "Synth".to_string()],
                all: false,
            }
        );
    }

    #[test]
    fn test_monitor_all_conflicts_with_sources() {
        assert!(Args::try_parse_from(["midiplex", "monitor", "--all", "--source", "x"]).is_err());
    }

    #[test]
    fn test_send_destination_conflicts_with_virtual() {
        assert!(Args::try_parse_from([
            "midiplex",
            "send",
            "dump.syx",
            "--destination",
            "Synth",
            "--virtual"
        ])
        .is_err());
    }

    #[test]
    fn test_send_flags_override_config() {
        let args = Args::parse_from([
            "midiplex",
            "--config",
            "midiplex.toml",
            "send",
            "dump.syx",
            "--pause",
            "40",
            "--buffer-size",
            "128",
            "--no-pacing",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("midiplex.toml")));

        let mut config = EngineConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.pause_between_messages_ms, 40);
        assert_eq!(config.custom_buffer_size, Some(128));
        assert!(!config.sends_sysex_async);
    }

    #[test]
    fn test_receive_timeout_overrides_config() {
        let args = Args::parse_from(["midiplex", "receive", "--multiple", "--timeout", "2500"]);
        let mut config = EngineConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.sysex_timeout_ms, 2500);
    }

    #[test]
    fn test_valid_source_names() {
        let selected = validate_sources(&["Mock Device".to_string()], &offered()).unwrap();
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|s| s.kind == ProviderKind::Port));
    }

    #[test]
    fn test_invalid_source_name() {
        let error = validate_sources(&["Nonexistent Device".to_string()], &offered()).unwrap_err();
        assert!(error.contains("Nonexistent Device"));
        assert!(error.contains("  - Mock Device 1"));
    }

    #[test]
    fn test_destination_lookup_skips_virtual() {
        let destinations = vec![
            OutputDestination::Port(Endpoint::new(4, "Sampler")),
            OutputDestination::Virtual,
        ];
        assert_eq!(
            validate_destination("Samp", &destinations),
            Ok(OutputDestination::Port(Endpoint::new(4, "Sampler")))
        );
        assert!(validate_destination("source", &destinations).is_err());
    }
}
