use crate::{error::GatewayResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration after defaults, config.toml and environment overrides.
pub async fn get_config(state: web::Data<AppState>) -> GatewayResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": state.config(),
        "limits": {
            "max_buffered_seconds": state.config.session.max_buffered_bytes as f64 / 32000.0
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::testing;
    use crate::transcription::engine::testing::ScriptedEngine;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_config_shows_effective_values() {
        let (state, _monitor) = testing::app_state(AppConfig::default(), ScriptedEngine::new());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["transcription"]["language"], "ja");
        assert_eq!(body["config"]["transcription"]["model"], "small");
        assert_eq!(body["config"]["session"]["max_buffered_bytes"], 3_840_000);
        assert_eq!(body["limits"]["max_buffered_seconds"], 120.0);
    }
}
