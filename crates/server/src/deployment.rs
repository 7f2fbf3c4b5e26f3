use std::sync::Arc;

use chrono::Duration;
use db::DBService;
use secrecy::{ExposeSecret, SecretString};
use services::services::{
    auth::AuthService,
    catalog_sync::CatalogSyncService,
    config::Config,
    erp::{ErpClient, ErpSource},
    exchange_rate::{ExchangeRateService, HttpRateSource},
    progress::ProgressHub,
};
use tracing::info;
use utils::jwt::TokenSigner;

/// Everything a request handler needs, cheap to clone
#[derive(Clone)]
pub struct LocalDeployment {
    db: DBService,
    auth: AuthService,
    catalog_sync: CatalogSyncService,
    exchange_rates: ExchangeRateService,
}

impl LocalDeployment {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let db = DBService::new(&config.database_url).await?;

        let signer = TokenSigner::new(
            config.jwt_secret.expose_secret().as_bytes(),
            Duration::hours(config.token_ttl_hours),
        );
        let erp_key = config
            .erp
            .api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_string()));
        let erp = ErpClient::new(config.erp.base_url.clone(), erp_key)?;
        let exchange_rates = ExchangeRateService::new(
            Arc::new(HttpRateSource::new(config.exchange_rate_url.clone())?),
            config.rate_cache_ttl,
        );

        let deployment = Self::from_parts(
            db,
            AuthService::new(signer),
            Arc::new(erp),
            exchange_rates,
            &config.catalog_currency,
            config.erp.page_size,
        );

        deployment.catalog_sync.recover_interrupted().await?;

        if let Some(admin) = &config.admin {
            let created = AuthService::ensure_admin(
                &deployment.db.pool,
                &admin.email,
                admin.password.expose_secret(),
            )
            .await?;
            if !created {
                info!(email = %admin.email, "Bootstrap admin already exists");
            }
        }

        Ok(deployment)
    }

    pub fn from_parts(
        db: DBService,
        auth: AuthService,
        erp: Arc<dyn ErpSource>,
        exchange_rates: ExchangeRateService,
        catalog_currency: &str,
        page_size: u32,
    ) -> Self {
        let catalog_sync = CatalogSyncService::new(
            db.clone(),
            erp,
            exchange_rates.clone(),
            ProgressHub::new(),
            catalog_currency,
            page_size,
        );

        Self {
            db,
            auth,
            catalog_sync,
            exchange_rates,
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn catalog_sync(&self) -> &CatalogSyncService {
        &self.catalog_sync
    }

    pub fn exchange_rates(&self) -> &ExchangeRateService {
        &self.exchange_rates
    }
}
