//! [`DatabaseExecutor`] backed by the real MongoDB driver: filter/sort/
//! skip/limit assembly, cursor draining into a `Vec`.
//!
//! Every method here does the same two things: turn a `serde_json::Value`
//! into a BSON shape the driver accepts, run the operation, turn the
//! BSON result back into `Value`. The `mongodb-errors` feature on
//! `quarrygate-common` supplies the `?`-compatible error conversions.

use crate::connection::Connection;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::stream::TryStreamExt;
use mongodb::options::FindOptions;
use quarrygate_common::GatewayError;
use quarrygate_procedures::{DatabaseExecutor, StepRecord};
use quarrygate_schema::StepKind;
use serde_json::Value;

pub struct MongoExecutor {
    connection: Connection,
}

impl MongoExecutor {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

fn to_document(value: Value) -> Result<Document, GatewayError> {
    match bson::to_bson(&value)? {
        Bson::Document(doc) => Ok(doc),
        Bson::Null => Ok(Document::new()),
        other => Err(GatewayError::QueryParse(format!("expected a JSON object, got {other:?}"))),
    }
}

fn from_document(doc: Document) -> Result<Value, GatewayError> {
    Ok(bson::from_bson(Bson::Document(doc))?)
}

fn from_bson(value: Bson) -> Result<Value, GatewayError> {
    Ok(bson::from_bson(value)?)
}

fn parse_sort(sort: Option<Value>) -> Result<Option<Document>, GatewayError> {
    sort.map(to_document).transpose()
}

#[async_trait]
impl DatabaseExecutor for MongoExecutor {
    async fn find(&self, collection: &str, filter: Value, select: Option<String>, sort: Option<Value>, limit: Option<i64>) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let mut options = FindOptions::default();
        options.sort = parse_sort(sort)?;
        options.limit = limit;
        if let Some(fields) = select {
            let mut projection = Document::new();
            for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                projection.insert(field, 1);
            }
            options.projection = Some(projection);
        }

        let mut cursor = coll.find(to_document(filter)?).with_options(options).await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            out.push(from_document(doc)?);
        }
        Ok(Value::Array(out))
    }

    async fn find_one(&self, collection: &str, filter: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        match coll.find_one(to_document(filter)?).await? {
            Some(doc) => from_document(doc),
            None => Err(GatewayError::NotFound(format!("no document matched in '{collection}'"))),
        }
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let doc = to_document(document)?;
        let result = coll.insert_one(doc).await?;
        Ok(serde_json::json!({ "insertedId": from_bson(result.inserted_id)? }))
    }

    async fn insert_many(&self, collection: &str, documents: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let docs = documents
            .as_array()
            .ok_or_else(|| GatewayError::QueryParse("'documents' must be an array".into()))?
            .iter()
            .cloned()
            .map(to_document)
            .collect::<Result<Vec<_>, _>>()?;
        let result = coll.insert_many(docs).await?;
        let ids: Vec<Value> = result.inserted_ids.into_values().map(from_bson).collect::<Result<_, _>>()?;
        Ok(serde_json::json!({ "insertedIds": ids, "insertedCount": ids.len() }))
    }

    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let update_doc = to_document(update)?;
        let update = as_update_document(update_doc);
        let result = coll.update_one(to_document(filter)?, update).await?;
        Ok(serde_json::json!({
            "matchedCount": result.matched_count,
            "modifiedCount": result.modified_count,
        }))
    }

    async fn update_many(&self, collection: &str, filter: Value, update: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let update_doc = to_document(update)?;
        let update = as_update_document(update_doc);
        let result = coll.update_many(to_document(filter)?, update).await?;
        Ok(serde_json::json!({
            "matchedCount": result.matched_count,
            "modifiedCount": result.modified_count,
        }))
    }

    async fn delete_one(&self, collection: &str, filter: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let result = coll.delete_one(to_document(filter)?).await?;
        Ok(serde_json::json!({ "deletedCount": result.deleted_count }))
    }

    async fn delete_many(&self, collection: &str, filter: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let result = coll.delete_many(to_document(filter)?).await?;
        Ok(serde_json::json!({ "deletedCount": result.deleted_count }))
    }

    async fn aggregate(&self, collection: &str, pipeline: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let stages = pipeline
            .as_array()
            .ok_or_else(|| GatewayError::QueryParse("pipeline must be an array of stages".into()))?
            .iter()
            .cloned()
            .map(to_document)
            .collect::<Result<Vec<_>, _>>()?;
        let mut cursor = coll.aggregate(stages).await?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            out.push(from_document(doc)?);
        }
        Ok(Value::Array(out))
    }

    async fn count_documents(&self, collection: &str, filter: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let count = coll.count_documents(to_document(filter)?).await?;
        Ok(Value::from(count))
    }

    async fn distinct(&self, collection: &str, field: &str, filter: Value) -> Result<Value, GatewayError> {
        let coll = self.connection.get_collection(collection);
        let values = coll.distinct(field, to_document(filter)?).await?;
        let values = values.into_iter().map(from_bson).collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(values))
    }

    async fn rollback_step(&self, kind: &StepKind, record: &StepRecord) -> Result<(), GatewayError> {
        // Only inserts have an obvious inverse: delete back out by the id
        // the insert produced. Every other step kind is left alone.
        if let StepKind::InsertOne { collection, .. } = kind {
            if let Some(id) = record.output.get("insertedId") {
                let id_bson = bson::to_bson(id)?;
                let coll = self.connection.get_collection(collection);
                coll.delete_one(doc! { "_id": id_bson }).await.ok();
            }
        }
        Ok(())
    }
}

/// `updateOne`/`updateMany` accept either an update-operator document
/// (`{"$set": ...}`) or a full replacement document; the driver
/// distinguishes them by the presence of `$`-prefixed top-level keys.
fn as_update_document(doc: Document) -> Document {
    let is_operator_form = doc.keys().any(|k| k.starts_with('$'));
    if is_operator_form {
        doc
    } else {
        doc! { "$set": doc }
    }
}
