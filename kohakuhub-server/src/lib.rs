// Copyright 2025 KohakuHub Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! KohakuHub server: a self-hosted, HuggingFace-compatible model /
//! dataset / space hub over a versioned object store and S3.

pub mod admin;
pub mod api;
pub mod auth;
pub mod cas;
pub mod commit;
pub mod error;
pub mod fallback;
pub mod lfs;
pub mod quota;
pub mod resolve;
pub mod state;
pub mod stats;
pub mod tasks;

use anyhow::Result;
use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kohakuhub_core::HubConfig;
use kohakuhub_db::Db;
use kohakuhub_storage::{RosClient, VosClient};

use auth::auth_middleware;
use state::AppState;

pub async fn run_server(config: HubConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kohakuhub=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting KohakuHub ({})", config.app.site_name);
    config.validate()?;

    let db = Db::connect(&config.app.database_url).await?;
    tracing::info!(
        "connected to {} metadata store",
        config.app.db_backend
    );

    let vos = VosClient::new(
        &config.lakefs.endpoint,
        &config.lakefs.access_key,
        &config.lakefs.secret_key,
    );
    let ros = RosClient::new(
        &config.s3.endpoint,
        &config.s3.region,
        &config.s3.access_key,
        &config.s3.secret_key,
        config.s3.public_endpoint.as_deref(),
    );

    let base_url = config.app.base_url.clone();
    let state = AppState::new(config, db, vos, ros)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tasks::spawn_background_tasks(state.clone(), shutdown_rx);

    let app = build_router(state);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], 48888).into();
    tracing::info!("listening on http://{addr} (public base {base_url})");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Assemble the full route table. Routes stay thin; each delegates to
/// its owning subsystem.
pub fn build_router(state: AppState) -> Router {
    // HF-compatible surface outside /api: resolve + git-LFS endpoints.
    let download_routes = Router::new()
        .route(
            "/:repo_type/:namespace/:name/resolve/:revision/*path",
            get(resolve::resolve),
        )
        .route(
            "/:repo_type/:namespace/:name/info/lfs/objects/batch",
            post(lfs::batch),
        )
        .route(
            "/:repo_type/:namespace/:name/info/lfs/verify",
            post(lfs::verify),
        )
        .route(
            "/:repo_type/:namespace/:name/info/lfs/complete/:upload_id",
            post(lfs::complete_multipart),
        )
        .route("/cas/reconstructions/:file_id", get(cas::get_reconstruction));

    let api_routes = Router::new()
        // Identification and utilities.
        .route("/api/version", get(api::misc::version))
        .route("/api/site-config", get(api::misc::site_config))
        .route("/api/whoami-v2", get(api::misc::whoami_v2))
        .route("/api/validate-yaml", post(api::misc::validate_yaml))
        .route("/api/validate/check-name", post(api::misc::check_name))
        // Accounts.
        .route("/api/auth/register", post(auth::routes::register))
        .route("/api/auth/login", post(auth::routes::login))
        .route("/api/auth/logout", post(auth::routes::logout))
        .route(
            "/api/auth/verify-email/:token",
            get(auth::routes::verify_email),
        )
        .route(
            "/api/auth/tokens",
            get(auth::routes::list_tokens).post(auth::routes::create_token),
        )
        .route("/api/auth/tokens/:token_id", delete(auth::routes::delete_token))
        .route(
            "/api/auth/external-tokens",
            get(api::external_tokens::list_tokens).put(api::external_tokens::set_token),
        )
        .route(
            "/api/auth/external-tokens/:url",
            delete(api::external_tokens::delete_token),
        )
        // Organizations.
        .route("/api/org/create", post(api::orgs::create_org))
        .route("/api/org/users/:username/orgs", get(api::orgs::list_user_orgs))
        .route("/api/org/:org_name", get(api::orgs::org_info))
        .route(
            "/api/org/:org_name/members",
            get(api::orgs::list_members).post(api::orgs::add_member),
        )
        .route(
            "/api/org/:org_name/members/:username",
            put(api::orgs::update_member_role).delete(api::orgs::remove_member),
        )
        .route(
            "/api/org/:org_name/settings",
            put(api::settings::update_org_settings),
        )
        // Invitations.
        .route(
            "/api/invitations",
            get(api::invitations::list_invitations),
        )
        .route(
            "/api/invitations/create",
            post(api::invitations::create_invitation),
        )
        .route(
            "/api/invitations/:token/accept",
            post(api::invitations::accept_invitation),
        )
        .route(
            "/api/invitations/:token",
            delete(api::invitations::delete_invitation),
        )
        // User settings and storage.
        .route(
            "/api/users/:username/settings",
            put(api::settings::update_user_settings),
        )
        .route(
            "/api/users/:username/storage",
            get(api::settings::user_storage),
        )
        // Repositories.
        .route("/api/repos/create", post(api::repos::create_repo))
        .route("/api/repos/delete", delete(api::repos::delete_repo))
        .route("/api/trending", get(stats::trending))
        .route("/api/cas/reconstructions/:file_id", get(cas::get_reconstruction))
        .route("/api/:repo_type", get(api::repos::list_repos))
        .route(
            "/api/:repo_type/:namespace/:name",
            get(api::repos::repo_info),
        )
        .route(
            "/api/:repo_type/:namespace/:name/tree/:revision",
            get(api::repos::tree_root),
        )
        .route(
            "/api/:repo_type/:namespace/:name/tree/:revision/*path",
            get(api::repos::tree),
        )
        .route(
            "/api/:repo_type/:namespace/:name/refs",
            get(api::repos::list_refs),
        )
        .route(
            "/api/:repo_type/:namespace/:name/branch",
            post(api::repos::create_branch),
        )
        .route(
            "/api/:repo_type/:namespace/:name/branch/:branch",
            delete(api::repos::delete_branch),
        )
        .route(
            "/api/:repo_type/:namespace/:name/commits/:branch",
            get(api::repos::list_commits),
        )
        .route(
            "/api/:repo_type/:namespace/:name/commit/:revision",
            post(commit::commit_endpoint),
        )
        .route(
            "/api/:repo_type/:namespace/:name/stats",
            get(stats::repo_stats),
        )
        .route(
            "/api/:repo_type/:namespace/:name/stats/recent",
            get(stats::recent_stats),
        )
        .route(
            "/api/:repo_type/:namespace/:name/settings",
            put(api::settings::update_repo_settings),
        )
        .route(
            "/api/:repo_type/:namespace/:name/xet-read-token/:revision/*path",
            get(cas::xet_read_token),
        )
        // Admin.
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/:username", delete(admin::delete_user))
        .route(
            "/api/admin/users/:username/quota",
            put(admin::set_user_quota),
        )
        .route("/api/admin/commits", get(admin::recent_commits))
        .route("/api/admin/quota/recalculate", post(admin::recalculate))
        .route(
            "/api/admin/fallback-sources",
            get(admin::list_fallback_sources).post(admin::create_fallback_source),
        )
        .route(
            "/api/admin/fallback-sources/:id",
            axum::routing::patch(admin::update_fallback_source)
                .delete(admin::delete_fallback_source),
        )
        .route(
            "/api/admin/invitations",
            get(admin::list_invitations).post(admin::create_invitation),
        )
        .route(
            "/api/admin/invitations/:token",
            delete(admin::delete_invitation),
        )
        .route(
            "/api/admin/fallback-cache/stats",
            get(admin::fallback_cache_stats),
        )
        .route(
            "/api/admin/fallback-cache/clear",
            post(admin::fallback_cache_clear),
        )
        .route("/api/admin/query", get(admin::sql_query));

    Router::new()
        .route("/health", get(api::misc::health))
        .merge(download_routes)
        .merge(api_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
