use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use manetsim::logging::{LogConfig, LogOutput, init_logging, level_for_verbosity, parse_log_level};
use manetsim::scenario::ScenarioConfig;
use manetsim::simulation::{RunReport, SimulationEngine};
use manetsim::stats::{read_flow_records, summarize, write_flow_records};

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("manetsim")
        .version("0.1.0")
        .about("MANET群れ編隊・攻撃ノードシミュレーション")
        .long_about(
            "移動アドホックネットワークの離散事象シミュレーション\n\
             群れの巡回・隊形制御とブラックホール／グレイホール攻撃下での\n\
             配送率・遅延・スループットを評価します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .conflicts_with("compare"),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .requires("scenario")
                .help("シナリオの情報のみ表示して終了"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .requires("scenario")
                .help("フロー記録のJSON出力先（シナリオ設定を上書き）"),
        )
        .arg(
            Arg::new("compare")
                .short('c')
                .long("compare")
                .value_name("FILE")
                .num_args(1..)
                .help("出力済みのフロー記録(.json)を読み込み、集計指標を並べて表示"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("DEST")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)"),
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");

    // ログ初期化
    let output = match matches
        .get_one::<String>("log-output")
        .map(|s| s.parse::<LogOutput>())
        .unwrap_or(Ok(LogOutput::Console))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
    };
    let level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or_else(|| level_for_verbosity(verbose_level));
    let log_config = LogConfig {
        level,
        output,
        ..LogConfig::default()
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            None
        }
    };

    println!("MANET群れシミュレーション - manetsim v0.1.0");
    println!();

    if let Some(files) = matches.get_many::<String>("compare") {
        let files: Vec<&String> = files.collect();
        if let Err(e) = compare_flow_files(&files) {
            error!("比較処理に失敗しました: {}", e);
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        let output_override = matches.get_one::<String>("output").cloned();
        match run_scenario(scenario_path, matches.get_flag("info"), output_override, verbose_level) {
            Ok(_) => {
                if verbose_level > 0 {
                    println!("シナリオ実行が正常に完了しました。");
                }
            }
            Err(e) => {
                error!("シナリオ実行に失敗しました: {}", e);
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        show_default_help();
    }
}

/// シナリオファイルを読み込んで実行
fn run_scenario(
    scenario_path: &str,
    info_only: bool,
    output_override: Option<String>,
    verbose_level: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut scenario = ScenarioConfig::from_file(scenario_path)?;
    info!(path = scenario_path, "SCENARIO_LOADED: シナリオファイルを読み込みました");

    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    if output_override.is_some() {
        scenario.output.flows_file = output_override;
    }

    execute_scenario(scenario, verbose_level)
}

/// シナリオの実行と結果出力
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    scenario.print_summary();
    println!();

    let title = scenario
        .output
        .report_title
        .clone()
        .unwrap_or_else(|| format!("{} METRICS", scenario.meta.name.to_uppercase()));
    let flows_file = scenario.output.flows_file.clone();

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;
    let report = simulation.run();

    print_run_report(&report, &title, verbose_level);

    if let Some(path) = flows_file {
        write_flow_records(&path, &report.records)?;
        info!(path = %path, flows = report.records.len(), "FLOWS_EXPORTED: フロー記録を書き出しました");
        println!("フロー記録: {}", path);
    }

    Ok(())
}

fn print_run_report(report: &RunReport, title: &str, verbose_level: u8) {
    report.metrics.print_report(title);

    if !report.forwarding.is_empty() {
        println!();
        println!("=== 攻撃ノード転送統計 ===");
        for stats in &report.forwarding {
            let policy = stats.policy.map(|p| p.label()).unwrap_or("未有効化");
            println!(
                "  {}: {} (受理: {}, 破棄: {})",
                stats.node_id, policy, stats.accepted, stats.dropped
            );
        }
    }

    if verbose_level > 1 {
        println!();
        println!("=== フロー別統計 ===");
        for record in &report.records {
            println!(
                "  flow {} ({} -> {}): tx {} / rx {} / lost {} / {:.3} kbps",
                record.flow_id,
                record.source,
                record.destination,
                record.tx_packets,
                record.rx_packets,
                record.lost_packets,
                record.throughput_bps() / 1000.0
            );
        }

        println!();
        println!("=== ノード最終状態 ===");
        for state in &report.nodes {
            if state.waypoint_legs > 0 {
                println!(
                    "  {} [{}]: {} (移動区間: {})",
                    state.node_id, state.role, state.position, state.waypoint_legs
                );
            } else {
                println!("  {} [{}]: {}", state.node_id, state.role, state.position);
            }
        }
    }
}

/// 複数のフロー記録ファイルの集計指標を並べて表示
fn compare_flow_files(files: &[&String]) -> Result<(), Box<dyn std::error::Error>> {
    println!("{:<32} {:>10} {:>14} {:>16}", "シナリオ", "PDR (%)", "平均遅延 (s)", "スループット (kbps)");
    for file in files {
        let records = read_flow_records(file)?;
        let metrics = summarize(&records);
        let name = std::path::Path::new(file.as_str())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string());
        println!(
            "{:<32} {:>10.2} {:>14.6} {:>16.3}",
            name,
            metrics.delivery_ratio_pct,
            metrics.average_delay_s,
            metrics.throughput_kbps()
        );
    }
    Ok(())
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  manetsim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>    シナリオファイルを指定して実行");
    println!("  -i, --info               シナリオ情報のみ表示");
    println!("  -o, --output <FILE>      フロー記録のJSON出力先");
    println!("  -c, --compare <FILE>...  フロー記録ファイルの集計比較");
    println!("  -v, --verbose            詳細出力 (複数指定で詳細レベル上昇)");
    println!("  -h, --help               このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/swarm_baseline.yaml   - 攻撃なしの群れ巡回");
    println!("  scenarios/swarm_blackhole.yaml  - 巡回中のブラックホール攻撃");
    println!("  scenarios/swarm_grayhole.yaml   - 巡回中のグレイホール攻撃 (p=0.3)");
    println!("  scenarios/static_blackhole.yaml - 固定配置の中継チェーン上のブラックホール");
    println!("  scenarios/random_waypoint_baseline.yaml - 30台のランダムウェイポイント移動（攻撃なし）");
    println!();
    println!("例:");
    println!("  manetsim -s scenarios/swarm_grayhole.yaml -v");
    println!("  manetsim -s scenarios/swarm_baseline.yaml -i");
    println!("  manetsim -c results/baseline_swarm.json results/blackhole_swarm.json results/grayhole_swarm.json");
}
