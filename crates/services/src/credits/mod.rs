pub mod ledger;
pub mod ports;
pub mod pricing;
pub mod service;

pub use ports::{
    CreditTransaction, CreditTransactionRepository, CreditsService, CreditsSummary,
    NewCreditTransaction, PaymentMethod,
};
pub use pricing::{ModelRate, ModelRates, TokenUsage};
pub use service::CreditsServiceImpl;
