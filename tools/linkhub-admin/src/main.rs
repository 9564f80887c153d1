//! linkhub-admin: operational commands for the Link Hub backend.
//!
//! AWS credentials and region come from the usual environment/profile chain.

use anyhow::Context;
use aws_sdk_dynamodb::client::Waiters;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType, Projection,
    ProjectionType, ScalarAttributeType, TimeToLiveSpecification,
};
use aws_sdk_dynamodb::Client as DynamoClient;
use clap::{Parser, Subcommand};
use linkhub_shared::config::DEFAULT_TABLE_NAME;
use linkhub_shared::{admin, auth, dynamo};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "linkhub-admin", about = "Link Hub operational CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the argon2id PHC hash of a password
    HashPassword {
        password: String,
    },
    /// Compute the Cognito SECRET_HASH for a username
    SecretHash {
        #[arg(long)]
        username: String,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        client_secret: String,
    },
    /// Create the single table with GSI1/GSI2 and TTL on `ttl`
    BootstrapTable {
        #[arg(long, default_value = DEFAULT_TABLE_NAME)]
        table: String,
    },
    /// Store an admin account
    CreateAdmin {
        #[arg(long, default_value = DEFAULT_TABLE_NAME)]
        table: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::HashPassword { password } => {
            println!("{}", admin::hash_password(&password)?);
        }
        Commands::SecretHash {
            username,
            client_id,
            client_secret,
        } => {
            println!(
                "{}",
                auth::compute_secret_hash(&username, &client_id, &client_secret)?
            );
        }
        Commands::BootstrapTable { table } => {
            let client = dynamo_client().await;
            bootstrap_table(&client, &table).await?;
        }
        Commands::CreateAdmin {
            table,
            username,
            password,
        } => {
            let username = username.trim().to_string();
            anyhow::ensure!(!username.is_empty(), "username must not be empty");
            let hash = admin::hash_password(&password)?;
            let client = dynamo_client().await;
            admin::put_admin(&client, &table, &username, &hash)
                .await
                .with_context(|| format!("Failed to store admin {} in {}", username, table))?;
            println!("Admin {} created in {}", username, table);
        }
    }

    Ok(())
}

async fn dynamo_client() -> DynamoClient {
    let sdk_config = aws_config::load_from_env().await;
    DynamoClient::new(&sdk_config)
}

fn string_attribute(name: &str) -> anyhow::Result<AttributeDefinition> {
    Ok(AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()?)
}

fn key(name: &str, key_type: KeyType) -> anyhow::Result<KeySchemaElement> {
    Ok(KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()?)
}

fn attribute_definitions() -> anyhow::Result<Vec<AttributeDefinition>> {
    ["PK", "SK", "GSI1PK", "GSI1SK", "GSI2PK", "GSI2SK"]
        .into_iter()
        .map(string_attribute)
        .collect()
}

fn global_indexes() -> anyhow::Result<Vec<GlobalSecondaryIndex>> {
    [dynamo::GSI1, dynamo::GSI2]
        .into_iter()
        .map(|index| -> anyhow::Result<GlobalSecondaryIndex> {
            Ok(GlobalSecondaryIndex::builder()
                .index_name(index)
                .key_schema(key(&format!("{}PK", index), KeyType::Hash)?)
                .key_schema(key(&format!("{}SK", index), KeyType::Range)?)
                .projection(
                    Projection::builder()
                        .projection_type(ProjectionType::All)
                        .build(),
                )
                .build()?)
        })
        .collect()
}

async fn table_exists(client: &DynamoClient, table: &str) -> anyhow::Result<bool> {
    match client.describe_table().table_name(table).send().await {
        Ok(_) => Ok(true),
        Err(e)
            if e.as_service_error()
                .map(|se| se.is_resource_not_found_exception())
                .unwrap_or(false) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn bootstrap_table(client: &DynamoClient, table: &str) -> anyhow::Result<()> {
    if table_exists(client, table).await? {
        println!("Table {} already exists", table);
        return Ok(());
    }

    client
        .create_table()
        .table_name(table)
        .billing_mode(BillingMode::PayPerRequest)
        .set_attribute_definitions(Some(attribute_definitions()?))
        .key_schema(key("PK", KeyType::Hash)?)
        .key_schema(key("SK", KeyType::Range)?)
        .set_global_secondary_indexes(Some(global_indexes()?))
        .send()
        .await
        .with_context(|| format!("Failed to create table {}", table))?;
    tracing::info!("Waiting for {} to become active", table);

    client
        .wait_until_table_exists()
        .table_name(table)
        .wait(Duration::from_secs(300))
        .await
        .with_context(|| format!("Table {} did not become active", table))?;

    // TTL cannot be enabled in the create call
    client
        .update_time_to_live()
        .table_name(table)
        .time_to_live_specification(
            TimeToLiveSpecification::builder()
                .attribute_name("ttl")
                .enabled(true)
                .build()?,
        )
        .send()
        .await
        .with_context(|| format!("Failed to enable TTL on {}", table))?;

    println!("Created table {} with GSI1, GSI2 and TTL", table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_hash_command() {
        let cli = Cli::try_parse_from([
            "linkhub-admin",
            "secret-hash",
            "--username",
            "+14155550100",
            "--client-id",
            "abc",
            "--client-secret",
            "xyz",
        ])
        .unwrap();
        match cli.command {
            Commands::SecretHash { username, .. } => assert_eq!(username, "+14155550100"),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_table_defaults() {
        let cli = Cli::try_parse_from(["linkhub-admin", "bootstrap-table"]).unwrap();
        match cli.command {
            Commands::BootstrapTable { table } => assert_eq!(table, DEFAULT_TABLE_NAME),
            _ => panic!("wrong command"),
        }
        assert!(Cli::try_parse_from(["linkhub-admin", "create-admin", "--username", "ops"]).is_err());
    }

    #[test]
    fn test_table_definition() {
        let attributes = attribute_definitions().unwrap();
        assert_eq!(attributes.len(), 6);
        assert!(attributes.iter().all(|a| a.attribute_type() == &ScalarAttributeType::S));

        let indexes = global_indexes().unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[1].index_name(), "GSI2");
        assert_eq!(indexes[1].key_schema()[0].attribute_name(), "GSI2PK");
        assert_eq!(indexes[1].key_schema()[1].key_type(), &KeyType::Range);
    }
}
