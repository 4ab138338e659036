use melcloud_home::{
    validate_account, validation_error_key, BridgeConfig, CredentialLogin, Error,
};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PAGE: &str = r#"<html><body>
<form method="post">
  <input type="hidden" name="_csrf" value="tok123" />
  <input name="username" type="text" />
  <input name="password" type="password" />
</form>
</body></html>"#;

/// The service and the identity provider run on separate mock servers; the
/// identity provider is recognised by its origin.
struct LoginFixture {
    service: MockServer,
    idp: MockServer,
}

impl LoginFixture {
    async fn start() -> Self {
        let service = MockServer::start().await;
        let idp = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/bff/login"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/login?client_id=abc", idp.uri())),
            )
            .mount(&service)
            .await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "session=fresh; Path=/")
                    .set_body_string("<html>dashboard</html>"),
            )
            .mount(&service)
            .await;

        Self { service, idp }
    }

    async fn idp_serves_login_page(&self, html: &str) {
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&self.idp)
            .await;
    }

    async fn idp_accepts(&self, password: &str) {
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("_csrf=tok123"))
            .and(body_string_contains("username=user%40example.com"))
            .and(body_string_contains(format!("password={password}")))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/dashboard", self.service.uri())),
            )
            .expect(1)
            .mount(&self.idp)
            .await;
    }

    fn login(&self, password: &str) -> CredentialLogin {
        CredentialLogin::builder("user@example.com", SecretString::from(password.to_string()))
            .base_url(self.service.uri())
            .identity_marker(self.idp.uri())
            .build()
            .expect("login should build")
    }
}

#[tokio::test]
async fn login_submits_form_and_harvests_cookie() {
    let fx = LoginFixture::start().await;
    fx.idp_serves_login_page(LOGIN_PAGE).await;
    fx.idp_accepts("pw").await;

    let cookie = fx.login("pw").login().await.expect("login should succeed");
    assert_eq!(cookie, "session=fresh");
}

#[tokio::test]
async fn login_without_csrf_token_fails() {
    let fx = LoginFixture::start().await;
    fx.idp_serves_login_page("<html><form><input name=\"username\"></form></html>")
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.idp)
        .await;

    let err = fx.login("pw").login().await.unwrap_err();
    assert!(matches!(err, Error::Login(_)), "expected Login, got {err:?}");
}

#[tokio::test]
async fn login_with_rejected_credentials_fails() {
    let fx = LoginFixture::start().await;
    fx.idp_serves_login_page(LOGIN_PAGE).await;
    // Wrong password: the provider re-renders its own page instead of redirecting.
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&fx.idp)
        .await;

    let err = fx.login("wrong").login().await.unwrap_err();
    assert!(matches!(err, Error::Login(_)), "expected Login, got {err:?}");
}

#[tokio::test]
async fn login_redirect_elsewhere_fails() {
    let service = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bff/login"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/maintenance"))
        .mount(&service)
        .await;
    Mock::given(method("GET"))
        .and(path("/maintenance"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&service)
        .await;

    let login = CredentialLogin::builder("user@example.com", SecretString::from("pw".to_string()))
        .base_url(service.uri())
        .identity_marker("idp.invalid")
        .build()
        .unwrap();
    let err = login.login().await.unwrap_err();
    assert!(matches!(err, Error::Login(_)), "expected Login, got {err:?}");
}

#[tokio::test]
async fn login_straight_to_dashboard_reuses_session() {
    let service = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bff/login"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/dashboard"))
        .mount(&service)
        .await;
    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=kept; Path=/"))
        .mount(&service)
        .await;

    let login = CredentialLogin::builder("user@example.com", SecretString::from("pw".to_string()))
        .base_url(service.uri())
        .identity_marker("idp.invalid")
        .build()
        .unwrap();
    assert_eq!(login.login().await.unwrap(), "session=kept");
}

#[tokio::test]
async fn validate_cookie_account() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user/context"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "firstname": "Ada",
            "lastname": "Lovelace",
            "buildings": []
        })))
        .mount(&server)
        .await;

    let config = BridgeConfig::from_toml_str(&format!(
        "[account]\ncookie = \"session=abc\"\n[options]\nbase_url = \"{}\"\n",
        server.uri()
    ))
    .unwrap();
    let info = validate_account(&config).await.expect("account should validate");
    assert_eq!(info.title, "MELCloud Home (Ada Lovelace)");
    assert_eq!(info.cookie, "session=abc");
}

#[tokio::test]
async fn validate_rejected_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user/context"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = BridgeConfig::from_toml_str(&format!(
        "[account]\ncookie = \"session=old\"\n[options]\nbase_url = \"{}\"\n",
        server.uri()
    ))
    .unwrap();
    let err = validate_account(&config).await.unwrap_err();
    assert_eq!(validation_error_key(&config.account, &err), "invalid_cookie");
}

#[tokio::test]
async fn validate_credential_account_logs_in() {
    let fx = LoginFixture::start().await;
    fx.idp_serves_login_page(LOGIN_PAGE).await;
    fx.idp_accepts("pw").await;
    Mock::given(method("GET"))
        .and(path("/api/user/context"))
        .and(header("cookie", "session=fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "user@example.com",
            "buildings": []
        })))
        .expect(1)
        .mount(&fx.service)
        .await;

    let config = BridgeConfig::from_toml_str(&format!(
        "[account]\nusername = \"user@example.com\"\npassword = \"pw\"\n\
         [options]\nbase_url = \"{}\"\nidentity_marker = \"{}\"\n",
        fx.service.uri(),
        fx.idp.uri()
    ))
    .unwrap();
    let info = validate_account(&config).await.expect("account should validate");
    assert_eq!(info.title, "MELCloud Home (user@example.com)");
    assert_eq!(info.cookie, "session=fresh");
}
