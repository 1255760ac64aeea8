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

use anyhow::Result;
use clap::Parser;

use kohakuhub_core::HubConfig;
use kohakuhub_server::run_server;

#[derive(Parser, Debug)]
#[command(author, version, about = "KohakuHub server", long_about = None)]
struct Args {
    /// Public base URL (overrides KOHAKU_HUB_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Database URL (overrides KOHAKU_HUB_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Site display name (overrides KOHAKU_HUB_SITE_NAME)
    #[arg(long)]
    site_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = HubConfig::from_env();
    if let Some(base_url) = args.base_url {
        config.app.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(database_url) = args.database_url {
        config.app.database_url = database_url;
    }
    if let Some(site_name) = args.site_name {
        config.app.site_name = site_name;
    }

    run_server(config).await
}
