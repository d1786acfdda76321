mod common;

use std::time::Duration;

use anyhow::Result;
use mathsense::{
    config::Config,
    error::GenerationError,
    generation::{CodeGenerator, GenerationRequest},
    llm::LlmClient,
};
use tokio::net::TcpListener;

use common::{serve_chunks, serve_once, sse_response, status_response};

fn client_for(base: &str, key: Option<&str>) -> Result<LlmClient> {
    let mut pairs = vec![
        ("API_BASE_URL".to_string(), base.to_string()),
        ("REQUEST_TIMEOUT".to_string(), "5".to_string()),
        ("MATHSENSE_API_KEY".to_string(), String::new()),
        ("OPENAI_API_KEY".to_string(), String::new()),
    ];
    if let Some(k) = key {
        pairs.push(("OPENAI_API_KEY".to_string(), k.to_string()));
    }
    Ok(LlmClient::from_config(&Config::from_pairs(pairs))?)
}

#[tokio::test]
async fn streamed_reply_yields_fenced_code() -> Result<()> {
    let (base, server) = serve_once(sse_response(&[
        "Here is the plot:\n\n```python\nimport numpy as np\n",
        "import matplotlib.pyplot as plt\nx = np.linspace(0, 6.28, 100)\n",
        "plt.plot(x, np.sin(x))\n```\nEnjoy!",
    ]))
    .await;

    let generator = CodeGenerator::new(client_for(&base, Some("test-key"))?);
    let code = generator.generate(GenerationRequest::new("plot a sine wave")).await?;

    assert!(code.source.starts_with("import numpy as np\n"));
    assert!(code.source.contains("np.sin(x)"));
    assert!(!code.source.contains("```"));
    assert!(!code.source.contains("Enjoy"));
    assert_eq!(code.prompt, "plot a sine wave");

    let request = server.await?;
    assert!(request.starts_with("POST /v1/chat/completions"));
    assert!(request.contains("Bearer test-key"));
    assert!(request.contains("plot a sine wave"));
    assert!(request.contains("\"stream\":true"));
    Ok(())
}

#[tokio::test]
async fn characters_split_between_writes_survive() -> Result<()> {
    let response = sse_response(&["```python\nimport math\nplt_title = 'θ from 0 to 2π'\n```"]);
    let bytes = response.into_bytes();
    // cut inside the two-byte encoding of θ
    let cut = bytes.iter().position(|&b| b == 0xCE).expect("theta") + 1;
    let (base, server) = serve_chunks(vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()]).await;

    let generator = CodeGenerator::new(client_for(&base, Some("k"))?);
    let code = generator.generate(GenerationRequest::new("polar angle")).await?;
    assert!(code.source.contains("'θ from 0 to 2π'"), "{}", code.source);
    assert!(!code.source.contains('\u{FFFD}'));
    server.await?;
    Ok(())
}

#[tokio::test]
async fn plain_json_reply_is_accepted() -> Result<()> {
    let body = serde_json::json!({
        "choices": [{ "message": { "content": "```python\nimport math\nprint(math.pi)\n```" } }]
    })
    .to_string();
    let (base, server) = serve_once(status_response("200 OK", &body)).await;

    let generator = CodeGenerator::new(client_for(&base, Some("k"))?);
    let code = generator.generate(GenerationRequest::new("pi")).await?;
    assert_eq!(code.source, "import math\nprint(math.pi)\n");
    server.await?;
    Ok(())
}

#[tokio::test]
async fn rejected_key_is_an_authentication_failure() -> Result<()> {
    let (base, server) = serve_once(status_response(
        "401 Unauthorized",
        r#"{"error":{"message":"Incorrect API key provided"}}"#,
    ))
    .await;

    let generator = CodeGenerator::new(client_for(&base, Some("wrong"))?);
    let err = generator
        .generate(GenerationRequest::new("plot a sine wave"))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Authentication(_)), "{err:?}");
    server.await?;
    Ok(())
}

#[tokio::test]
async fn missing_key_fails_without_network() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);

    let generator = CodeGenerator::new(client_for(&base, None)?);
    let err = generator
        .generate(GenerationRequest::new("plot a sine wave"))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::Authentication(_)), "{err:?}");

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "no connection should have been attempted");
    Ok(())
}

#[tokio::test]
async fn unreachable_service_is_unavailable() -> Result<()> {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };

    let generator = CodeGenerator::new(client_for(&format!("http://{addr}"), Some("k"))?);
    let err = generator
        .generate(GenerationRequest::new("plot a sine wave"))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::ServiceUnavailable(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn quota_exhaustion_is_unavailable() -> Result<()> {
    let (base, server) = serve_once(status_response(
        "429 Too Many Requests",
        r#"{"error":{"message":"You exceeded your current quota"}}"#,
    ))
    .await;

    let generator = CodeGenerator::new(client_for(&base, Some("k"))?);
    let err = generator
        .generate(GenerationRequest::new("plot a sine wave"))
        .await
        .unwrap_err();
    match err {
        GenerationError::ServiceUnavailable(msg) => assert!(msg.contains("quota"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
    server.await?;
    Ok(())
}

#[tokio::test]
async fn prose_only_reply_is_malformed() -> Result<()> {
    let (base, server) =
        serve_once(sse_response(&["I'm sorry, I can't help with that request."])).await;

    let generator = CodeGenerator::new(client_for(&base, Some("k"))?);
    let err = generator
        .generate(GenerationRequest::new("plot a sine wave"))
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::MalformedResponse(_)), "{err:?}");
    server.await?;
    Ok(())
}

#[tokio::test]
async fn empty_prompt_never_reaches_the_service() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);

    let generator = CodeGenerator::new(client_for(&base, Some("k"))?);
    let err = generator.generate(GenerationRequest::new("   \n")).await.unwrap_err();
    assert_eq!(err, GenerationError::EmptyPrompt);

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err());
    Ok(())
}
