pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_interaction;
pub mod order_item;
