//! Check-config command handler.
//!
//! Loads the same configuration the run command would use and prints the
//! effective values, so a bad deployment fails in CI instead of on chain.

use crate::config::{AppConfig, SessionConfig};

/// Load configuration from the environment and print the effective values.
///
/// # Errors
/// Returns error when a variable is present but unparseable, or when the
/// markets file cannot be read.
pub fn run_check_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    println!("--- Quotekeeper Configuration ---");
    println!("Oracle URL:      {}", config.oracle_url);
    println!("Poll interval:   {}s", config.poll_interval_secs);
    println!("Settle wait:     {}s", config.settle_wait_secs);
    println!("Max fee:         {}", config.max_fee);
    println!("Recovery fee:    {}", config.recovery_max_fee());

    println!("\nTokens:");
    for token in &config.tokens {
        println!(
            "  {:<6} {:>2} decimals  {}",
            token.symbol, token.decimals, token.address
        );
    }

    println!("\nMarkets:");
    for (id, entry) in &config.markets {
        let policy = &entry.policy;
        println!("  market {} ({})", id, entry.oracle_symbol);
        println!("    target distance:  {}", policy.target_relative_distance);
        println!(
            "    band:             {} .. {}",
            policy.min_relative_distance, policy.max_relative_distance
        );
        println!("    order size:       {}", policy.order_dollar_size);
        println!(
            "    min quote value:  {}",
            policy.minimal_remaining_quote_value
        );
        println!("    max per side:     {}", policy.max_orders_per_side);
    }

    match SessionConfig::from_env() {
        Ok(session) => {
            println!("\nAccount:         {}", session.account);
            println!("Exchange:        {}", session.exchange_address);
            println!("Gateway URL:     {}", session.gateway_url);
        }
        Err(e) => {
            println!("\nSession:         not configured ({})", e);
            println!("                 only --paper runs will work");
        }
    }
    println!("---------------------------------");

    Ok(())
}
