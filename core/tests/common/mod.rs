//! Record types and server startup shared by the integration suites.
#![allow(dead_code)]

use remote_repository::Model;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "firstName")]
    pub first_name: String,
    pub age: u32,
}

impl Model for User {
    const TYPE_TAG: &'static str = "User";
    const COLLECTION: &'static str = "Users";

    fn primary_key(&self) -> Option<Value> {
        self.id.clone().map(Value::String)
    }
}

/// Stored in the same collection as [`User`]; the server tags it apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Superuser {
    pub id: Option<String>,
    #[serde(rename = "firstName")]
    pub first_name: String,
    pub age: u32,
    pub superpower: String,
}

impl Model for Superuser {
    const TYPE_TAG: &'static str = "Superuser";
    const COLLECTION: &'static str = "Users";

    fn primary_key(&self) -> Option<Value> {
        self.id.clone().map(Value::String)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Option<String>,
    #[serde(rename = "firstName")]
    pub first_name: String,
    pub age: u32,
}

impl Model for Agent {
    const TYPE_TAG: &'static str = "Agent";
    const COLLECTION: &'static str = "Agents";

    fn primary_key(&self) -> Option<Value> {
        self.id.clone().map(Value::String)
    }
}

/// Start the mock server on a random port and return its base URL.
pub fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}
