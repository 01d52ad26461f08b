//! Chat Client Tests
//!
//! Runs chat turns against an in-process server imitating Ollama's
//! `/api/chat`, `/api/tags` and `/api/ps`.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use llmgit::{ChatConfig, ChatHistory, ChatMessage, Error, OllamaClient, Role};

#[derive(Default)]
struct MockOllama {
    /// Assistant text, streamed in pieces of `chunk` chars
    reply: String,
    chunk: usize,
    /// Tool to call when tools are offered
    tool: Option<String>,
    requests: Vec<Value>,
}

type Shared = Arc<Mutex<MockOllama>>;

async fn chat(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut mock = state.lock().unwrap();
    mock.requests.push(body.clone());

    if body.get("tools").is_some() {
        if let Some(tool) = &mock.tool {
            return Json(json!({
                "model": body["model"],
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": tool, "arguments": {}}}],
                },
                "done": true,
            }))
            .into_response();
        }
    }

    let chars: Vec<char> = mock.reply.chars().collect();
    let mut ndjson = String::new();
    for piece in chars.chunks(mock.chunk.max(1)) {
        let content: String = piece.iter().collect();
        let line = json!({
            "message": {"role": "assistant", "content": content},
            "done": false,
        });
        ndjson.push_str(&format!("{}\n", line));
    }
    ndjson.push_str(&format!(
        "{}\n",
        json!({"message": {"role": "assistant", "content": ""}, "done": true})
    ));
    ([("content-type", "application/x-ndjson")], ndjson).into_response()
}

async fn tags() -> Json<Value> {
    Json(json!({
        "models": [{"name": "llama3:8b", "size": 4_661_224_676u64, "modified_at": "2024-05-01"}]
    }))
}

async fn ps() -> Json<Value> {
    Json(json!({"models": []}))
}

/// Helper to start a mock Ollama; returns its base URL
async fn spawn_ollama(mock: MockOllama) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(mock));
    let app = Router::new()
        .route("/api/chat", post(chat))
        .route("/api/tags", get(tags))
        .route("/api/ps", get(ps))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn history(prompt: &str) -> ChatHistory {
    ChatHistory::from(vec![ChatMessage::user(prompt)])
}

mod streaming {
    use super::*;

    #[tokio::test]
    async fn test_structured_reply() {
        let reply = r#"{"explanation":"A greeting","files":[{"filename":"hello.py","language":"python","content":"print('hi')\n","explanation":"entry"}]}"#;
        let (host, state) = spawn_ollama(MockOllama {
            reply: reply.into(),
            chunk: 7,
            ..Default::default()
        })
        .await;
        let client = OllamaClient::new(ChatConfig::new("coder").host(host)).unwrap();

        let mut updates: Vec<String> = Vec::new();
        let input = history("write hello world");
        let turn = client
            .chat(&input, |text| updates.push(text.to_string()))
            .await
            .unwrap();

        assert_eq!(turn.reply, reply);
        assert_eq!(turn.tool_rounds, 0);
        assert_eq!(updates.last().map(String::as_str), Some(reply));
        assert!(updates.windows(2).all(|w| w[1].starts_with(w[0].as_str())));

        // Caller's history untouched; the turn's history has the reply.
        assert_eq!(input.len(), 1);
        assert_eq!(turn.history.len(), 2);
        assert_eq!(turn.history.messages()[1].role, Role::Assistant);

        let files = turn.response().file_descriptors();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "hello.py");

        let mock = state.lock().unwrap();
        let request = &mock.requests[0];
        assert_eq!(request["model"], "coder");
        assert_eq!(request["stream"], true);
        assert_eq!(request["messages"][0]["role"], "system");
        assert!(request.get("format").is_some());
        assert!(request.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_truncated_reply_is_repaired() {
        let (host, _state) = spawn_ollama(MockOllama {
            reply: r#"{"explanation": "ok", "files": ["#.into(),
            chunk: 5,
            ..Default::default()
        })
        .await;
        let client = OllamaClient::new(ChatConfig::new("coder").host(host)).unwrap();

        let turn = client.chat(&history("hi"), |_| {}).await.unwrap();
        let response = turn.response();
        assert_eq!(response.explanation, "ok");
        assert!(response.files.is_empty());
    }

    #[tokio::test]
    async fn test_plain_chat_without_structured_output() {
        let (host, state) = spawn_ollama(MockOllama {
            reply: "Just text.".into(),
            chunk: 3,
            ..Default::default()
        })
        .await;
        let config = ChatConfig::new("m").host(host).structured_output(false);
        let client = OllamaClient::new(config).unwrap();

        let turn = client.chat(&history("hi"), |_| {}).await.unwrap();
        assert_eq!(turn.response().explanation, "Just text.");

        let mock = state.lock().unwrap();
        let request = &mock.requests[0];
        assert_eq!(request["messages"][0]["role"], "user");
        assert!(request.get("format").is_none());
    }
}

mod tools {
    use super::*;

    #[tokio::test]
    async fn test_tool_round_trip() {
        let (host, state) = spawn_ollama(MockOllama {
            reply: "Nothing is loaded.".into(),
            chunk: 4,
            tool: Some("ollama_ps".into()),
            ..Default::default()
        })
        .await;
        let client = OllamaClient::new(ChatConfig::new("m").host(host)).unwrap();

        let turn = client
            .chat(&history("Which Ollama models are running?"), |_| {})
            .await
            .unwrap();

        assert_eq!(turn.tool_rounds, 1);
        assert_eq!(turn.reply, "Nothing is loaded.");

        let messages = turn.history.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].tool_calls[0].function.name, "ollama_ps");
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("0"));
        assert_eq!(
            messages[2].content,
            "## Running Models\n\nNo models currently running."
        );

        let mock = state.lock().unwrap();
        let requests = &mock.requests;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["stream"], false);
        assert_eq!(requests[0]["tools"].as_array().unwrap().len(), 2);
        assert_eq!(requests[1]["stream"], true);
        assert!(requests[1].get("tools").is_none());
    }

    #[tokio::test]
    async fn test_tools_only_offered_on_trigger_word() {
        let (host, state) = spawn_ollama(MockOllama {
            reply: "{}".into(),
            tool: Some("ollama_ls".into()),
            ..Default::default()
        })
        .await;
        let client = OllamaClient::new(ChatConfig::new("m").host(host)).unwrap();

        let turn = client.chat(&history("list files"), |_| {}).await.unwrap();
        assert_eq!(turn.tool_rounds, 0);
        assert!(state.lock().unwrap().requests[0].get("tools").is_none());
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let (host, _state) = spawn_ollama(MockOllama {
            tool: Some("ollama_ls".into()),
            ..Default::default()
        })
        .await;
        let client =
            OllamaClient::new(ChatConfig::new("m").host(host).max_tool_rounds(0)).unwrap();

        let err = client
            .chat(&history("ollama models?"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Chat(_)));
    }

    #[tokio::test]
    async fn test_model_listing() {
        let (host, _state) = spawn_ollama(MockOllama::default()).await;
        let client = OllamaClient::new(ChatConfig::new("m").host(host)).unwrap();

        let models = client.list_models().await.unwrap();
        assert_eq!(models[0].name, "llama3:8b");
        assert!(client.running_models().await.unwrap().is_empty());
    }
}

mod errors {
    use super::*;

    #[tokio::test]
    async fn test_http_error_maps_to_chat_error() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async { (StatusCode::NOT_FOUND, "model 'x' not found") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            OllamaClient::new(ChatConfig::new("x").host(format!("http://{}", addr))).unwrap();
        let err = client.chat(&history("hi"), |_| {}).await.unwrap_err();
        match err {
            Error::Chat(msg) => {
                assert!(msg.contains("404"));
                assert!(msg.contains("model 'x' not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let client =
            OllamaClient::new(ChatConfig::new("x").host("http://127.0.0.1:1")).unwrap();
        let err = client.chat(&history("hi"), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Chat(_)));
    }
}
