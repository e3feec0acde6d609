pub mod promo;
