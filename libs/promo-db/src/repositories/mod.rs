pub mod promo_repo;
