mod tests {
    use crate::*;

    #[test]
    fn test_sanitize_path_allows_simple_relative() {
        let p = sanitize_path("foo/bar.json").expect("relative path should be allowed");
        assert_eq!(p, PathBuf::from("foo/bar.json"));
    }

    #[test]
    fn test_sanitize_path_rejects_parent_dir() {
        let err = sanitize_path("foo/../bar.json").unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitize_path_allows_absolute_unix() {
        let p = sanitize_path("/tmp/program.json").expect("absolute path should be allowed");
        assert_eq!(p, PathBuf::from("/tmp/program.json"));
    }

    #[test]
    fn test_cli_args_rejects_parent_dir_in_assemble() {
        let err = CliArgs::try_parse_from(["evmasm", "assemble", "../a.json"]).unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[test]
    fn test_cli_args_parses_optimise_flags() {
        let args = CliArgs::try_parse_from([
            "evmasm",
            "assemble",
            "a.json",
            "--optimize",
            "--runs",
            "1",
            "--evm-version",
            "byzantium",
        ])
        .expect("should parse");
        let Commands::Assemble { file, optimise, .. } = args.command else {
            panic!("expected assemble command");
        };
        assert_eq!(file, PathBuf::from("a.json"));
        assert!(optimise.optimize);
        assert_eq!(optimise.runs, Some(1));
        assert_eq!(optimise.evm_version, Some(EvmVersion::Byzantium));
    }

    #[test]
    fn test_cli_args_rejects_unknown_evm_version() {
        assert!(CliArgs::try_parse_from(["evmasm", "print", "a.json", "--evm-version", "london"]).is_err());
    }

    #[test]
    fn test_resolve_settings_without_request_skips_optimisation() {
        let settings = resolve_settings(&OptimiseArgs::default()).expect("no config to read");
        assert!(settings.is_none());
    }

    #[test]
    fn test_resolve_settings_flags_override_defaults() {
        let args = OptimiseArgs {
            optimize: true,
            runs: Some(5),
            creation: true,
            ..OptimiseArgs::default()
        };
        let settings = resolve_settings(&args).expect("resolves").expect("optimises");
        assert!(settings.run_cse && settings.run_constant_optimiser && settings.run_deduplicate);
        assert!(settings.is_creation);
        assert_eq!(settings.expected_executions_per_deployment, 5);
    }

    #[test]
    fn test_env_toggle_and_filter() {
        assert!(!env_toggle_enabled("0"));
        assert!(!env_toggle_enabled(" off "));
        assert!(env_toggle_enabled("1"));
        assert_eq!(filter_expr_from("true"), None);
        assert_eq!(filter_expr_from("evmasm::cse=trace").as_deref(), Some("evmasm::cse=trace"));
    }

    #[test]
    fn test_parse_link_checks_address_width() {
        let (name, address) = parse_link("Math=0x1111111111111111111111111111111111111111").expect("valid link");
        assert_eq!(name, "Math");
        assert_eq!(address, [0x11; ADDRESS_WIDTH]);
        let err = parse_link("Math=0x1234").unwrap_err();
        assert!(err.to_string().contains("expected 20"));
        assert!(parse_link("Math").is_err());
    }
}
