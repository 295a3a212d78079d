use super::*;

use shared::{error::ErrorCode, protocol::ProtocolVersion};

/// Resolves `token-<user>` to `<user>`; users named `admin...` hold `admin`.
struct FixedTokens;

#[async_trait]
impl Authenticator for FixedTokens {
    async fn user_for_token(&self, token: &str) -> Result<Option<String>> {
        Ok(token.strip_prefix("token-").map(str::to_string))
    }

    async fn capabilities(&self, user: &str) -> Result<BTreeSet<String>> {
        let mut caps = BTreeSet::new();
        if user.starts_with("admin") {
            caps.insert("admin".to_string());
        }
        Ok(caps)
    }
}

struct Anonymous;

#[async_trait]
impl Authenticator for Anonymous {
    async fn user_for_token(&self, _token: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn capabilities(&self, _user: &str) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }
}

fn setup() -> RpcService {
    let mut service = RpcService::new(Arc::new(FixedTokens), None);
    service.add("echo", |_ctx, args| async move {
        let text: String = args.get(0, "text")?;
        anyhow::Ok(Value::String(text))
    });
    service.add("explode", |_ctx, _args| async move {
        Err::<Value, _>(anyhow::anyhow!("kaboom"))
    });
    service.add_with_capability("secret", Some("admin"), |ctx, _args| async move {
        anyhow::Ok(json!({"user": ctx.user}))
    });
    service.add("rotate", |ctx, _args| async move {
        ctx.set_token(Some("rotated".into()));
        anyhow::Ok(Value::Null)
    });
    service
}

fn request(method: &str, args: Vec<Value>) -> RpcRequest {
    RpcRequest::new(method, args, ProtocolVersion::V2)
}

#[test]
fn builtins_are_always_registered() {
    let service = RpcService::new(Arc::new(Anonymous), Some("admin".into()));
    assert_eq!(
        service.method_names(),
        vec!["getDetails", "getMethods", "hasCapability"]
    );
    assert_eq!(service.required_capability("getMethods"), None);
}

#[test]
fn default_capability_applies_to_plain_add() {
    let mut service = RpcService::new(Arc::new(Anonymous), Some("member".into()));
    service.add("guarded", |_ctx, _args| async move { anyhow::Ok(Value::Null) });
    service.add_with_capability("open", None, |_ctx, _args| async move { anyhow::Ok(Value::Null) });

    assert_eq!(service.required_capability("guarded"), Some("member"));
    assert_eq!(service.required_capability("open"), None);
}

#[test]
fn call_args_prefer_position_then_keyword() {
    let mut kwargs = Map::new();
    kwargs.insert("role".into(), json!("admin"));
    let args = CallArgs::new(vec![json!("bob")], kwargs);

    let user: String = args.get(0, "username").expect("positional");
    let role: String = args.get(1, "role").expect("keyword");
    let missing: Option<String> = args.get(2, "extra").expect("absent is null");

    assert_eq!(user, "bob");
    assert_eq!(role, "admin");
    assert_eq!(missing, None);
    assert!(args.get::<u32>(0, "username").is_err());
}

#[tokio::test]
async fn get_methods_lists_every_name() {
    let service = setup();
    let listed = service
        .invoke(request(BOOTSTRAP_METHOD, Vec::new()), &CallContext::anonymous())
        .await
        .expect("list");
    assert_eq!(
        listed,
        json!(["echo", "explode", "getDetails", "getMethods", "hasCapability", "rotate", "secret"])
    );
}

#[tokio::test]
async fn unknown_method_is_an_exception() {
    let service = setup();
    let err = service
        .invoke(request("nope", Vec::new()), &CallContext::anonymous())
        .await
        .expect_err("unknown");
    assert_eq!(err.code(), Some(ErrorCode::Exception));
    assert_eq!(
        err.message,
        "An exception occurred while calling method 'nope'."
    );
}

#[tokio::test]
async fn handler_failure_is_an_exception() {
    let service = setup();
    let err = service
        .invoke(request("explode", Vec::new()), &CallContext::anonymous())
        .await
        .expect_err("kaboom");
    assert_eq!(err, RemoteError::exception("explode"));
}

#[tokio::test]
async fn missing_capability_is_not_authorized() {
    let service = setup();
    let ctx = service
        .context_for(None, Some("token-bob".into()), None)
        .await;
    let err = service
        .invoke(request("secret", Vec::new()), &ctx)
        .await
        .expect_err("bob is not an admin");
    assert_eq!(err, RemoteError::not_authorized("secret"));
}

#[tokio::test]
async fn envelope_token_wins_over_cookie() {
    let service = setup();
    let ctx = service
        .context_for(
            None,
            Some("token-admin-ann".into()),
            Some("token-bob".into()),
        )
        .await;
    assert_eq!(ctx.user.as_deref(), Some("admin-ann"));

    let value = service
        .invoke(request("secret", Vec::new()), &ctx)
        .await
        .expect("admin may call");
    assert_eq!(value, json!({"user": "admin-ann"}));
}

#[tokio::test]
async fn cookie_token_is_used_without_envelope_token() {
    let service = setup();
    let ctx = service
        .context_for(None, None, Some("token-bob".into()))
        .await;
    assert_eq!(ctx.user.as_deref(), Some("bob"));
    assert_eq!(ctx.token().as_deref(), Some("token-bob"));
}

#[tokio::test]
async fn caller_details_and_has_capability() {
    let service = setup();
    let ctx = service
        .context_for(None, Some("token-admin-ann".into()), None)
        .await;

    let details = service
        .invoke(request("getDetails", Vec::new()), &ctx)
        .await
        .expect("details");
    assert_eq!(details, json!({"capabilities": ["admin"], "user": "admin-ann"}));

    let has = service
        .invoke(request("hasCapability", vec![json!("admin")]), &ctx)
        .await
        .expect("has");
    assert_eq!(has, json!(true));

    let anonymous = service
        .invoke(request("hasCapability", vec![json!("admin")]), &CallContext::anonymous())
        .await
        .expect("has");
    assert_eq!(anonymous, json!(false));
}

#[tokio::test]
async fn handlers_may_replace_the_session_token() {
    let service = setup();
    let ctx = CallContext::anonymous();
    service
        .invoke(request("rotate", Vec::new()), &ctx)
        .await
        .expect("rotate");
    assert_eq!(ctx.token().as_deref(), Some("rotated"));
}

#[tokio::test]
async fn response_shape_follows_request_version() {
    let service = setup();
    let ctx = CallContext::anonymous();

    let v2 = service
        .handle(request("explode", Vec::new()), &ctx)
        .await;
    assert_eq!(v2["SimpleWebAPIError"], json!("Exception"));

    let v1 = service
        .handle(
            RpcRequest::new("echo", vec![json!("hi")], ProtocolVersion::V1),
            &ctx,
        )
        .await;
    assert_eq!(v1, json!({"success": true, "result": "hi"}));

    let undeclared: RpcRequest =
        serde_json::from_value(json!({"method": "explode"})).expect("request");
    let legacy = service.handle(undeclared, &ctx).await;
    assert_eq!(legacy["success"], json!(false));
    assert_eq!(legacy["error"], json!("Exception"));
}
