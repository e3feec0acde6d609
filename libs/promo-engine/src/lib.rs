pub mod activeness;
pub mod error;
pub mod fraud;
pub mod mutation;
pub mod promo_service;
pub mod redemption_service;
pub mod targeting;

pub use error::PromoError;
pub use promo_service::PromoService;
pub use redemption_service::RedemptionService;
