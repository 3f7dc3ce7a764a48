//! REST client for the object store (`SceneGlobal` / `AROGlobal` classes).

use std::time::Duration;

use aro::{
    NewObject, ObjectStore, RemoteObject, Scene, StoreError, OBJECT_CLASS, SCENE_CLASS,
};
use foundation::MapId;
use maps::BoxFuture;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ObjectStoreConfig;

const APP_ID_HEADER: &str = "X-Parse-Application-Id";
const REST_KEY_HEADER: &str = "X-Parse-REST-API-Key";
const SESSION_HEADER: &str = "X-Parse-Session-Token";

#[derive(Debug, Deserialize)]
struct QueryResults<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(rename = "objectId")]
    object_id: String,
}

pub struct RestObjectStore {
    client: Client,
    config: ObjectStoreConfig,
}

impl RestObjectStore {
    pub fn new(config: ObjectStoreConfig, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn class_url(&self, class: &str) -> String {
        format!("{}/classes/{class}", self.config.url.trim_end_matches('/'))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(APP_ID_HEADER, &self.config.app_id)
            .header(REST_KEY_HEADER, &self.config.rest_key);
        match &self.config.session_token {
            Some(token) => builder.header(SESSION_HEADER, token),
            None => builder,
        }
    }

    async fn send<R: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        class: &'static str,
        id: &str,
    ) -> Result<R, StoreError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                class,
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<R>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn update_scene_list(
        &self,
        scene_id: String,
        op: &str,
        object_ids: Vec<String>,
    ) -> Result<(), StoreError> {
        let url = format!("{}/{scene_id}", self.class_url(SCENE_CLASS));
        let builder = self.request(Method::PUT, url).json(&scene_list_op(op, &object_ids));
        let _: Value = self.send(builder, SCENE_CLASS, &scene_id).await?;
        Ok(())
    }
}

/// Writable fields of an object; the id travels in the URL.
fn object_fields(object: &RemoteObject) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(object).map_err(|e| StoreError::Decode(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.remove("objectId");
    }
    Ok(value)
}

fn scene_list_op(op: &str, object_ids: &[String]) -> Value {
    json!({ "AROs": { "__op": op, "objects": object_ids } })
}

fn where_clause(value: Value) -> String {
    value.to_string()
}

impl ObjectStore for RestObjectStore {
    fn find_scene_by_map(&self, map_id: MapId) -> BoxFuture<'_, Result<Option<Scene>, StoreError>> {
        Box::pin(async move {
            let query = [
                ("where", where_clause(json!({ "mapId": map_id.0 }))),
                ("limit", "1".to_string()),
            ];
            let builder = self
                .request(Method::GET, self.class_url(SCENE_CLASS))
                .query(&query);
            let found: QueryResults<Scene> =
                self.send(builder, SCENE_CLASS, &map_id.to_string()).await?;
            Ok(found.results.into_iter().next())
        })
    }

    fn create_scene(&self, map_id: MapId) -> BoxFuture<'_, Result<Scene, StoreError>> {
        Box::pin(async move {
            let builder = self
                .request(Method::POST, self.class_url(SCENE_CLASS))
                .json(&json!({ "mapId": map_id.0, "AROs": [] }));
            let created: Created = self.send(builder, SCENE_CLASS, &map_id.to_string()).await?;
            debug!(scene_id = %created.object_id, %map_id, "scene created");
            Ok(Scene {
                id: created.object_id,
                map_id: map_id.0,
                objects: Vec::new(),
            })
        })
    }

    fn list_objects(&self, scene_id: String) -> BoxFuture<'_, Result<Vec<RemoteObject>, StoreError>> {
        Box::pin(async move {
            let query = [("where", where_clause(json!({ "sceneId": scene_id })))];
            let builder = self
                .request(Method::GET, self.class_url(OBJECT_CLASS))
                .query(&query);
            let found: QueryResults<RemoteObject> =
                self.send(builder, OBJECT_CLASS, &scene_id).await?;
            Ok(found.results)
        })
    }

    fn create_object(&self, new: NewObject) -> BoxFuture<'_, Result<RemoteObject, StoreError>> {
        Box::pin(async move {
            let draft = RemoteObject::from_new(String::new(), new);
            let builder = self
                .request(Method::POST, self.class_url(OBJECT_CLASS))
                .json(&object_fields(&draft)?);
            let created: Created = self.send(builder, OBJECT_CLASS, &draft.scene_id).await?;
            Ok(RemoteObject {
                id: created.object_id,
                ..draft
            })
        })
    }

    fn save_object(&self, object: RemoteObject) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let url = format!("{}/{}", self.class_url(OBJECT_CLASS), object.id);
            let builder = self.request(Method::PUT, url).json(&object_fields(&object)?);
            let _: Value = self.send(builder, OBJECT_CLASS, &object.id).await?;
            Ok(())
        })
    }

    fn delete_object(&self, object_id: String) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let url = format!("{}/{object_id}", self.class_url(OBJECT_CLASS));
            let _: Value = self
                .send(self.request(Method::DELETE, url), OBJECT_CLASS, &object_id)
                .await?;
            Ok(())
        })
    }

    fn add_to_scene(
        &self,
        scene_id: String,
        object_ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.update_scene_list(scene_id, "AddUnique", object_ids))
    }

    fn remove_from_scene(
        &self,
        scene_id: String,
        object_ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.update_scene_list(scene_id, "Remove", object_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro::Prefab;
    use foundation::Wgs84;
    use pretty_assertions::assert_eq;

    fn store() -> RestObjectStore {
        RestObjectStore::new(
            ObjectStoreConfig {
                url: "https://store.example/parse/".into(),
                app_id: "app".into(),
                rest_key: "key".into(),
                session_token: None,
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn class_urls_drop_trailing_slash() {
        assert_eq!(
            store().class_url(OBJECT_CLASS),
            "https://store.example/parse/classes/AROGlobal"
        );
    }

    #[test]
    fn object_fields_omit_id() {
        let object = RemoteObject::from_new(
            "abc",
            NewObject {
                scene_id: "s1".into(),
                author: "me".into(),
                prefab_index: 1,
                data: Prefab::Diamond.to_data(),
                position: Wgs84::new(60.0, 24.0, 3.0),
                orientation: [0.0, 0.0, 0.0, 1.0],
            },
        );
        let fields = object_fields(&object).unwrap();
        assert!(fields.get("objectId").is_none());
        assert_eq!(fields["sceneId"], json!("s1"));
        assert_eq!(fields["prefabIndex"], json!(1));
        assert_eq!(fields["latitude"], json!(60.0));
        assert_eq!(fields["quaternion_w"], json!(1.0));
    }

    #[test]
    fn scene_list_ops() {
        assert_eq!(
            scene_list_op("AddUnique", &["a".to_string(), "b".to_string()]),
            json!({ "AROs": { "__op": "AddUnique", "objects": ["a", "b"] } })
        );
    }

    #[test]
    fn query_results_decode_scenes() {
        let raw = r#"{"results":[{"objectId":"s9","mapId":42,"AROs":["x"],"createdAt":"2024-01-01T00:00:00Z"}]}"#;
        let parsed: QueryResults<Scene> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.results,
            vec![Scene {
                id: "s9".into(),
                map_id: 42,
                objects: vec!["x".into()],
            }]
        );
    }
}
