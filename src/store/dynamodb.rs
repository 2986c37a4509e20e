//! [`KvStore`] backed by Amazon DynamoDB.
//!
//! Tables are hash-keyed on a string attribute named [`KEY_ATTRIBUTE`]; all
//! other attributes are strings. Every read is strongly consistent, the lock
//! protocol depends on it.
//!
//! DynamoDB keeps an item around after its last non-key attribute is
//! removed. Such key-only items are treated as absent by every read.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::AttributeDefinition;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::types::BillingMode;
use aws_sdk_dynamodb::types::KeySchemaElement;
use aws_sdk_dynamodb::types::KeyType;
use aws_sdk_dynamodb::types::KeysAndAttributes;
use aws_sdk_dynamodb::types::ReturnValue;
use aws_sdk_dynamodb::types::ScalarAttributeType;
use aws_sdk_dynamodb::Client;
use futures::stream::BoxStream;
use futures::stream::StreamExt;
use futures::stream::TryStreamExt;
use tracing::debug;
use tracing::info;

use crate::error::StoreError;

use super::Attributes;
use super::Condition;
use super::DeleteOutcome;
use super::DeleteScope;
use super::Filter;
use super::KvStore;
use super::PutOutcome;
use super::Row;
use super::KEY_ATTRIBUTE;

/// Maximum number of keys per `BatchGetItem` request.
const BATCH_GET_LIMIT: usize = 100;

type Item = HashMap<String, AttributeValue>;

#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore").finish_non_exhaustive()
    }
}

impl DynamoDbStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a store from the ambient AWS configuration (environment,
    /// profile, instance metadata).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        Self::new(Client::new(&config))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Creates `table` unless it exists.
    pub async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        match self.client.describe_table().table_name(table).send().await {
            Ok(_) => return Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_resource_not_found_exception()) => {}
            Err(err) => return Err(StoreError::unavailable(err)),
        }

        let key_definition = AttributeDefinition::builder()
            .attribute_name(KEY_ATTRIBUTE)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(StoreError::unavailable)?;
        let key_schema = KeySchemaElement::builder()
            .attribute_name(KEY_ATTRIBUTE)
            .key_type(KeyType::Hash)
            .build()
            .map_err(StoreError::unavailable)?;

        let created = self
            .client
            .create_table()
            .table_name(table)
            .attribute_definitions(key_definition)
            .key_schema(key_schema)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match created {
            Ok(_) => {
                info!("Created table `{}`.", table);
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_resource_in_use_exception()) =>
            {
                debug!("Table `{}` was created concurrently.", table);
                Ok(())
            }
            Err(err) => Err(StoreError::unavailable(err)),
        }
    }
}

#[async_trait]
impl KvStore for DynamoDbStore {
    async fn put(
        &self,
        table: &str,
        key: &str,
        attributes: Attributes,
        condition: Option<Condition>,
    ) -> Result<PutOutcome, StoreError> {
        let mut expression = Expression::default();
        let assignments = attributes
            .into_iter()
            .enumerate()
            .map(|(i, (name, value))| {
                let n = expression.name(format!("#a{}", i), name);
                let v = expression.value(format!(":a{}", i), value);
                format!("{} = {}", n, v)
            })
            .collect::<Vec<_>>();
        let condition = condition.map(|c| expression.condition(&c));

        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .key(KEY_ATTRIBUTE, AttributeValue::S(key.to_string()))
            .set_condition_expression(condition);

        if !assignments.is_empty() {
            request = request.update_expression(format!("SET {}", assignments.join(", ")));
        }

        let result = expression.apply_to_update(request).send().await;

        match result {
            Ok(_) => Ok(PutOutcome::Written),
            Err(err) if condition_failed(&err) => Ok(PutOutcome::ConditionFailed),
            Err(err) => Err(classify(table, err)),
        }
    }

    async fn delete(
        &self,
        table: &str,
        key: &str,
        scope: DeleteScope,
        condition: Option<Condition>,
    ) -> Result<DeleteOutcome, StoreError> {
        let mut expression = Expression::default();
        let condition = condition.map(|c| expression.condition(&c));

        match scope {
            DeleteScope::Row => {
                let request = self
                    .client
                    .delete_item()
                    .table_name(table)
                    .key(KEY_ATTRIBUTE, AttributeValue::S(key.to_string()))
                    .return_values(ReturnValue::AllOld)
                    .set_condition_expression(condition);

                match expression.apply_to_delete(request).send().await {
                    Ok(output) => Ok(DeleteOutcome::Deleted(output.attributes().and_then(to_row))),
                    Err(err) if condition_failed(&err) => Ok(DeleteOutcome::ConditionFailed),
                    Err(err) => Err(classify(table, err)),
                }
            }
            DeleteScope::Attributes(names) => {
                let removals = names
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| expression.name(format!("#r{}", i), name))
                    .collect::<Vec<_>>();

                let request = self
                    .client
                    .update_item()
                    .table_name(table)
                    .key(KEY_ATTRIBUTE, AttributeValue::S(key.to_string()))
                    .update_expression(format!("REMOVE {}", removals.join(", ")))
                    .return_values(ReturnValue::AllOld)
                    .set_condition_expression(condition);

                match expression.apply_to_update(request).send().await {
                    Ok(output) => Ok(DeleteOutcome::Deleted(output.attributes().and_then(to_row))),
                    Err(err) if condition_failed(&err) => Ok(DeleteOutcome::ConditionFailed),
                    Err(err) => Err(classify(table, err)),
                }
            }
        }
    }

    async fn scan(
        &self,
        table: &str,
        filter: &Filter,
    ) -> Result<BoxStream<'static, Result<Row, StoreError>>, StoreError> {
        let client = self.client.clone();
        let table = table.to_string();
        let (expression, names, values) = filter.expression();
        let values: Item = values
            .into_iter()
            .map(|(k, v)| (k, AttributeValue::S(v)))
            .collect();

        let pages = futures::stream::try_unfold(Some(None), move |start: Option<Option<Item>>| {
            let client = client.clone();
            let table = table.clone();
            let expression = expression.clone();
            let names = names.clone();
            let values = values.clone();

            async move {
                let start = match start {
                    Some(start) => start,
                    None => return Ok::<_, StoreError>(None),
                };

                let mut request = client
                    .scan()
                    .table_name(&table)
                    .consistent_read(true)
                    .set_exclusive_start_key(start);

                if !expression.is_empty() {
                    request = request
                        .filter_expression(expression)
                        .set_expression_attribute_names(Some(names))
                        .set_expression_attribute_values(Some(values));
                }

                let response = request.send().await.map_err(|e| classify(&table, e))?;

                let rows = response
                    .items()
                    .iter()
                    .filter_map(to_row)
                    .map(Ok)
                    .collect::<Vec<Result<Row, StoreError>>>();

                let next = match response.last_evaluated_key() {
                    Some(key) if !key.is_empty() => Some(Some(key.clone())),
                    _ => None,
                };

                Ok::<_, StoreError>(Some((futures::stream::iter(rows), next)))
            }
        });

        Ok(pages.try_flatten().boxed())
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Row>, StoreError> {
        let mut rows = HashMap::new();

        for chunk in keys.chunks(BATCH_GET_LIMIT) {
            let keys = chunk
                .iter()
                .map(|k| {
                    let mut item = Item::new();
                    item.insert(KEY_ATTRIBUTE.to_string(), AttributeValue::S(k.clone()));
                    item
                })
                .collect::<Vec<_>>();

            let request = KeysAndAttributes::builder()
                .set_keys(Some(keys))
                .consistent_read(true)
                .build()
                .map_err(StoreError::unavailable)?;

            let mut pending = HashMap::new();
            pending.insert(table.to_string(), request);

            while !pending.is_empty() {
                let response = self
                    .client
                    .batch_get_item()
                    .set_request_items(Some(pending))
                    .send()
                    .await
                    .map_err(|e| classify(table, e))?;

                let items = response
                    .responses()
                    .and_then(|r| r.get(table))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                rows.extend(items.iter().filter_map(to_row).map(|r| (r.key.clone(), r)));

                pending = response.unprocessed_keys().cloned().unwrap_or_default();
            }
        }

        Ok(rows)
    }
}

/// Placeholders collected while rendering the expressions of one request.
#[derive(Default)]
struct Expression {
    names: HashMap<String, String>,
    values: Item,
}

impl Expression {
    fn name(&mut self, placeholder: String, name: String) -> String {
        self.names.insert(placeholder.clone(), name);
        placeholder
    }

    fn value(&mut self, placeholder: String, value: String) -> String {
        self.values
            .insert(placeholder.clone(), AttributeValue::S(value));
        placeholder
    }

    fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::AttributeEquals { name, value } => {
                let n = self.name("#c".to_string(), name.clone());
                let v = self.value(":c".to_string(), value.clone());
                format!("{} = {}", n, v)
            }
            Condition::AttributeExists(name) => {
                format!("attribute_exists({})", self.name("#c".to_string(), name.clone()))
            }
            Condition::AttributeNotExists(name) => {
                format!(
                    "attribute_not_exists({})",
                    self.name("#c".to_string(), name.clone())
                )
            }
        }
    }

    fn apply_to_update(
        self,
        request: aws_sdk_dynamodb::operation::update_item::builders::UpdateItemFluentBuilder,
    ) -> aws_sdk_dynamodb::operation::update_item::builders::UpdateItemFluentBuilder {
        request
            .set_expression_attribute_names(non_empty(self.names))
            .set_expression_attribute_values(non_empty(self.values))
    }

    fn apply_to_delete(
        self,
        request: aws_sdk_dynamodb::operation::delete_item::builders::DeleteItemFluentBuilder,
    ) -> aws_sdk_dynamodb::operation::delete_item::builders::DeleteItemFluentBuilder {
        request
            .set_expression_attribute_names(non_empty(self.names))
            .set_expression_attribute_values(non_empty(self.values))
    }
}

fn non_empty<V>(map: HashMap<String, V>) -> Option<HashMap<String, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Converts an item into a row, `None` if only the key is left.
fn to_row(item: &Item) -> Option<Row> {
    let key = item.get(KEY_ATTRIBUTE)?.as_s().ok()?.clone();

    let attributes = item
        .iter()
        .filter(|(name, _)| name.as_str() != KEY_ATTRIBUTE)
        .filter_map(|(name, value)| match value {
            AttributeValue::S(s) => Some((name.clone(), s.clone())),
            AttributeValue::N(n) => Some((name.clone(), n.clone())),
            _ => None,
        })
        .collect::<Attributes>();

    if attributes.is_empty() {
        None
    } else {
        Some(Row::new(key, attributes))
    }
}

trait ServiceErrorKind {
    fn is_conditional_check_failed(&self) -> bool;
    fn is_resource_not_found(&self) -> bool;
}

macro_rules! service_error_kind {
    ($($error:ty),*) => {
        $(
            impl ServiceErrorKind for $error {
                fn is_conditional_check_failed(&self) -> bool {
                    self.is_conditional_check_failed_exception()
                }

                fn is_resource_not_found(&self) -> bool {
                    self.is_resource_not_found_exception()
                }
            }
        )*
    };
}

service_error_kind!(
    aws_sdk_dynamodb::operation::update_item::UpdateItemError,
    aws_sdk_dynamodb::operation::delete_item::DeleteItemError
);

impl ServiceErrorKind for aws_sdk_dynamodb::operation::scan::ScanError {
    fn is_conditional_check_failed(&self) -> bool {
        false
    }

    fn is_resource_not_found(&self) -> bool {
        self.is_resource_not_found_exception()
    }
}

impl ServiceErrorKind for aws_sdk_dynamodb::operation::batch_get_item::BatchGetItemError {
    fn is_conditional_check_failed(&self) -> bool {
        false
    }

    fn is_resource_not_found(&self) -> bool {
        self.is_resource_not_found_exception()
    }
}

fn condition_failed<E: ServiceErrorKind, R>(err: &SdkError<E, R>) -> bool {
    err.as_service_error()
        .map_or(false, |e| e.is_conditional_check_failed())
}

fn classify<E, R>(table: &str, err: SdkError<E, R>) -> StoreError
where
    E: ServiceErrorKind + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if err
        .as_service_error()
        .map_or(false, |e| e.is_resource_not_found())
    {
        StoreError::NoSuchTable(table.to_string())
    } else {
        StoreError::unavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use aws_sdk_dynamodb::types::AttributeValue;

    use super::non_empty;
    use super::to_row;
    use super::Expression;
    use super::Item;
    use crate::store::Condition;
    use crate::store::KEY_ATTRIBUTE;

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_item_becomes_row_without_key_attribute() {
        let row = to_row(&item(&[
            (KEY_ATTRIBUTE, AttributeValue::S("app1_rackA_0".to_string())),
            ("appId", AttributeValue::S("app1".to_string())),
            ("Id", AttributeValue::N("0".to_string())),
            ("flag", AttributeValue::Bool(true)),
        ]))
        .unwrap();

        assert_eq!(row.key, "app1_rackA_0");
        assert_eq!(row.get("appId"), Some("app1"));
        assert_eq!(row.get("Id"), Some("0"));
        assert_eq!(row.get(KEY_ATTRIBUTE), None);
        assert_eq!(row.get("flag"), None);
    }

    #[test]
    fn test_key_only_item_reads_as_absent() {
        let only_key = item(&[(KEY_ATTRIBUTE, AttributeValue::S("k-lock".to_string()))]);

        assert!(to_row(&only_key).is_none());
        assert!(to_row(&item(&[("i-1", AttributeValue::S("i-1".to_string()))])).is_none());
    }

    #[test]
    fn test_condition_expressions() {
        let mut expression = Expression::default();
        let rendered = expression.condition(&Condition::attribute_equals("i-1", "i-1"));

        assert_eq!(rendered, "#c = :c");
        assert_eq!(expression.names.get("#c").map(String::as_str), Some("i-1"));
        assert_eq!(
            expression.values.get(":c"),
            Some(&AttributeValue::S("i-1".to_string()))
        );

        let mut expression = Expression::default();
        let rendered = expression.condition(&Condition::AttributeNotExists("Id".to_string()));
        assert_eq!(rendered, "attribute_not_exists(#c)");
        assert!(expression.values.is_empty());

        let mut expression = Expression::default();
        let rendered = expression.condition(&Condition::AttributeExists("Id".to_string()));
        assert_eq!(rendered, "attribute_exists(#c)");
    }

    #[test]
    fn test_empty_placeholder_maps_are_omitted() {
        assert_eq!(non_empty(HashMap::<String, String>::new()), None);

        let mut names = HashMap::new();
        names.insert("#a0".to_string(), "appId".to_string());
        assert_eq!(non_empty(names.clone()), Some(names));
    }
}
