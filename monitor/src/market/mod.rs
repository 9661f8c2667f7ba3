pub mod events;

pub use events::{LiquidityEvent, MarketEvent, PriceTick, ProtocolUpdateEvent, SwapEvent};
