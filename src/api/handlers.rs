//! REST API handlers for ledger operations

use crate::core::{Block, Transaction, TransactionError};
use crate::network::{NetworkError, NodeHandle};
use crate::wallet::{Wallet, WalletError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: NodeHandle,
    pub wallet: Arc<Wallet>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub transaction: Transaction,
    /// Whether the local pool queued it; it is gossiped either way
    pub pooled: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
        }),
    )
}

impl From<NetworkError> for (StatusCode, Json<ApiError>) {
    fn from(e: NetworkError) -> Self {
        api_error(StatusCode::SERVICE_UNAVAILABLE, e)
    }
}

fn wallet_error(e: WalletError) -> (StatusCode, Json<ApiError>) {
    let status = if e.is_auth_failure() {
        StatusCode::UNAUTHORIZED
    } else {
        match e {
            WalletError::InvalidAmount
            | WalletError::TransactionError(TransactionError::InsufficientFunds { .. }) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    };
    api_error(status, e)
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub receiver: String,
    pub amount: u64,
    pub password: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /blocks - The full chain
pub async fn get_blocks(State(state): State<ApiState>) -> ApiResult<Vec<Block>> {
    Ok(Json(state.node.blocks().await?))
}

/// GET /peers - Known peer ports
pub async fn get_peers(State(state): State<ApiState>) -> ApiResult<Vec<u16>> {
    Ok(Json(state.node.known_ports().await?))
}

/// GET /pool - Pending transactions in arrival order
pub async fn get_pool(State(state): State<ApiState>) -> ApiResult<Vec<Transaction>> {
    Ok(Json(state.node.pending().await?))
}

/// GET /address - The wallet's receiving address
pub async fn get_address(State(state): State<ApiState>) -> ApiResult<AddressResponse> {
    let address = state.wallet.address().map_err(wallet_error)?;
    Ok(Json(AddressResponse { address }))
}

/// GET /balance/{address}
pub async fn get_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<BalanceResponse> {
    let balance = state.node.balance(&address).await?;
    Ok(Json(BalanceResponse { address, balance }))
}

/// POST /transactions - Build, sign and submit a payment from the wallet
pub async fn create_transaction(
    State(state): State<ApiState>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<SubmitResponse> {
    let utxo_set = state.node.utxo_set().await?;

    // PBKDF2 runs off the async workers
    let wallet = state.wallet.clone();
    let tx = tokio::task::spawn_blocking(move || {
        wallet.create_transaction(&req.password, &req.receiver, req.amount, &utxo_set)
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
    .map_err(wallet_error)?;

    let pooled = state.node.submit_transaction(tx.clone()).await?;
    Ok(Json(SubmitResponse {
        transaction: tx,
        pooled,
    }))
}

/// POST /transactions/raw - Submit an already signed transaction
pub async fn submit_raw_transaction(
    State(state): State<ApiState>,
    Json(tx): Json<Transaction>,
) -> ApiResult<SubmitResponse> {
    let pooled = state.node.submit_transaction(tx.clone()).await?;
    Ok(Json(SubmitResponse {
        transaction: tx,
        pooled,
    }))
}

/// POST /mineBlock - Mine a block now and return it once appended
pub async fn mine_block(State(state): State<ApiState>) -> ApiResult<Block> {
    match state.node.mine_block().await? {
        Some(block) => Ok(Json(block)),
        None => Err(api_error(
            StatusCode::CONFLICT,
            "No block was mined: the node is not initialized or the attempt was superseded",
        )),
    }
}

/// POST /requestBlockchain - Ask every peer for its chain
pub async fn request_blockchain(State(state): State<ApiState>) -> ApiResult<StatusResponse> {
    state.node.request_blockchain().await?;
    Ok(Json(StatusResponse {
        message: "Blockchain requested from peers".to_string(),
    }))
}

/// POST /initialize - Start treating the local chain as authoritative
pub async fn initialize(State(state): State<ApiState>) -> ApiResult<StatusResponse> {
    state.node.initialize().await?;
    Ok(Json(StatusResponse {
        message: "Node initialized".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Blockchain;
    use crate::network::{start, NodeConfig};
    use crate::storage::KeyStore;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn node_state(dir: &tempfile::TempDir) -> ApiState {
        let wallet = Wallet::open(KeyStore::new(dir.path().join("keys.json")), "pw").unwrap();
        let chain = Blockchain::new(&wallet.address().unwrap());
        let config = NodeConfig {
            port: 0,
            tick_interval: Duration::from_secs(3600),
            ..NodeConfig::default()
        };
        let node = start(config, chain).await.unwrap();
        ApiState {
            node,
            wallet: Arc::new(wallet),
        }
    }

    fn payment(amount: u64, password: &str) -> Json<PaymentRequest> {
        Json(PaymentRequest {
            receiver: "bob".to_string(),
            amount,
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn test_payment_is_pooled() {
        let dir = tempdir().unwrap();
        let state = node_state(&dir).await;

        let Json(submitted) = create_transaction(State(state.clone()), payment(30, "pw"))
            .await
            .unwrap();
        assert!(submitted.pooled);
        assert_eq!(submitted.transaction.outputs.len(), 2);

        let Json(pool) = get_pool(State(state.clone())).await.unwrap();
        assert_eq!(pool, vec![submitted.transaction]);

        let address = state.wallet.address().unwrap();
        let Json(balance) = get_balance(State(state), Path(address)).await.unwrap();
        assert_eq!(balance.balance, 100);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let dir = tempdir().unwrap();
        let state = node_state(&dir).await;

        let (status, _) = create_transaction(State(state.clone()), payment(30, "guess"))
            .await
            .err()
            .unwrap();
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = create_transaction(State(state.clone()), payment(1000, "pw"))
            .await
            .err()
            .unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let Json(pool) = get_pool(State(state)).await.unwrap();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_mine_block_confirms_pooled_payment() {
        let dir = tempdir().unwrap();
        let state = node_state(&dir).await;

        let Json(submitted) = create_transaction(State(state.clone()), payment(30, "pw"))
            .await
            .unwrap();
        let Json(block) = mine_block(State(state.clone())).await.unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.data[1], submitted.transaction);

        let Json(blocks) = get_blocks(State(state.clone())).await.unwrap();
        assert_eq!(blocks.last(), Some(&block));
        let Json(pool) = get_pool(State(state.clone())).await.unwrap();
        assert!(pool.is_empty());

        let Json(balance) = get_balance(State(state), Path("bob".to_string()))
            .await
            .unwrap();
        assert_eq!(balance.balance, 30);
    }

    #[tokio::test]
    async fn test_stopped_node_is_unavailable() {
        let dir = tempdir().unwrap();
        let state = node_state(&dir).await;
        state.node.shutdown().await.unwrap();

        let (status, _) = get_blocks(State(state)).await.err().unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
