use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::{Arg, Command as ClapApp};
use tokio::sync::mpsc;

use vindex::handlers::{core, streaming, thumbnails};
use vindex::scanner;
use vindex::startup::{build_cors, build_metadata_chain, init_db, load_config};
use vindex::state::AppState;

fn main() {
    let matches = ClapApp::new("vindex")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Video library indexer and streaming server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE.json")
                .help("Path to config JSON file (overrides search)")
                .num_args(1),
        )
        .subcommand(
            ClapApp::new("scan")
                .about("Scan a folder and print progress events as JSON lines")
                .arg(Arg::new("folder").required(true)),
        )
        .get_matches();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    rt.block_on(async {
        // reads RUST_LOG
        tracing_subscriber::fmt::init();

        let config = match load_config(matches.get_one::<String>("config").map(|s| s.into())) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading configuration: {e}");
                std::process::exit(1);
            }
        };

        let pool = match init_db(&config).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Error opening database: {e}");
                std::process::exit(1);
            }
        };

        let metadata = build_metadata_chain(&config, pool.clone()).await;
        let state = AppState::new(pool, metadata, Arc::new(config));

        if let Some(scan) = matches.subcommand_matches("scan") {
            let folder = scan
                .get_one::<String>("folder")
                .cloned()
                .unwrap_or_default();
            run_cli_scan(state, folder).await;
            return;
        }

        let bind_addr = format!("{}:{}", state.config.host, state.config.port);
        let app = Router::new()
            .route("/scan", get(core::scan).post(core::scan))
            .route("/video", get(streaming::stream_handler))
            .route(
                "/thumbnails",
                post(thumbnails::regenerate_thumbnails).get(thumbnails::regenerate_thumbnails),
            )
            .route(
                "/playlists",
                get(core::playlists_get).post(core::playlists_post),
            )
            .route("/save_temp_playlist", post(core::save_temp_playlist))
            .route("/update_playlist", post(core::update_playlist))
            .route("/remove_playlist", post(core::remove_playlist))
            .route("/remove_from_playlist", post(core::remove_from_playlist))
            .route("/sessions", get(core::sessions_get).post(core::sessions_post))
            .route("/remove_session", post(core::remove_session))
            .route(
                "/favorites",
                get(core::favorites_get)
                    .post(core::favorites_post)
                    .delete(core::favorites_delete),
            )
            .route("/stats", get(core::stats_get))
            .route("/analytics", get(core::analytics_get))
            .layer(build_cors(&state.config))
            .with_state(state);

        tracing::info!("listening on {bind_addr}");
        axum::Server::bind(&bind_addr.parse().expect("invalid bind address"))
            .serve(app.into_make_service())
            .await
            .expect("server error");
    });
}

async fn run_cli_scan(state: AppState, folder: String) {
    let (tx, mut rx) = mpsc::channel(32);
    let scan = tokio::spawn(scanner::scan_folder(state, folder, tx));
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("unserializable event: {e}"),
        }
    }
    let _ = scan.await;
}
