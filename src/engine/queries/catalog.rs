//! Query name to document collection mapping

/// Collection used by each query of the analysis corpus, in corpus order
const COLLECTIONS: &[(&str, &str)] = &[
    // phase_1: market fundamentals
    ("Q1_1_market_growth_trajectory", "ev_sales_data"),
    ("Q1_4_top_performing_models", "ev_population_data"),
    ("Q2_1_infrastructure_density", "charging_stations"),
    ("Q2_2_fast_charging_availability", "charging_stations"),
    // phase_2: business intelligence
    ("Q1_2_market_share_evolution", "ev_population_data"),
    ("Q3_1_price_range_correlation", "ev_population_data"),
    ("Q4_1_manufacturer_positioning", "ev_population_data"),
    ("Q5_1_urban_rural_distribution", "ev_population_data"),
    // phase_3: advanced analytics
    ("Q3_3_seasonal_charging_patterns", "charging_stations"),
    ("Q5_2_highway_charging_corridors", "charging_stations"),
    ("Q6_1_optimal_station_placement", "charging_stations"),
    ("Q6_3_grid_impact_analysis", "charging_stations"),
    // phase_4: regional intelligence
    ("Q1_3_regional_adoption_rate", "ev_population_data"),
    ("Q2_3_network_coverage_analysis", "charging_stations"),
    ("Q2_4_infrastructure_gap_identification", "charging_stations"),
    ("Q4_2_brand_performance_by_region", "ev_population_data"),
    ("Q4_3_technology_adoption_rate", "ev_population_data"),
    ("Q4_4_price_evolution_analysis", "ev_population_data"),
    // phase_5: Italian market
    ("Q1_1_italy_market_evolution", "ev_sales_data"),
    ("Q1_3_italy_charging_infrastructure", "charging_stations"),
    ("Q2_1_eu_country_comparison", "ev_sales_data"),
    ("Q2_2_european_policy_impact", "ev_sales_data"),
    ("Q3_1_italian_price_preferences", "ev_population_data"),
    ("Q3_3_italian_brand_loyalty", "ev_population_data"),
    ("Q3_4_european_brand_dominance", "ev_population_data"),
    // phase_6: global market dynamics
    ("Q4_1_infrastructure_readiness", "ev_sales_data"),
    ("Q4_2_cross_border_success", "ev_population_data"),
    ("Q5_1_global_market_leaders", "ev_sales_data"),
    ("Q5_2_italy_vs_global_giants", "ev_sales_data"),
    ("Q5_3_global_brand_warfare", "ev_sales_data"),
    ("Q6_1_technology_adoption_patterns", "ev_sales_data"),
    ("Q6_2_policy_effectiveness_global", "ev_sales_data"),
    // phase_7: USA vs China
    ("Q7_1_usa_china_market_dominance", "ev_sales_data"),
    ("Q7_2_usa_china_technology_race", "ev_sales_data"),
    ("Q7_3_usa_china_infrastructure_race", "ev_sales_data"),
    ("Q7_4_usa_china_oil_displacement", "ev_sales_data"),
    ("Q7_5_usa_china_future_projections", "ev_sales_data"),
];

const CHARGING_KEYWORDS: &[&str] = &["charging", "station", "infrastructure", "corridor", "network", "grid"];
const POPULATION_KEYWORDS: &[&str] = &["population", "model", "brand", "manufacturer", "price", "vehicle"];

/// Number of queries with a known collection
pub fn known_query_count() -> usize {
    COLLECTIONS.len()
}

/// Resolve the document collection a query runs against.
///
/// Exact name first, then a substring match in either direction against the
/// known names (first hit in corpus order), then keywords in the name.
pub fn collection_for(query_name: &str) -> &'static str {
    if let Some((_, collection)) = COLLECTIONS.iter().find(|(name, _)| *name == query_name) {
        return collection;
    }

    if let Some((_, collection)) = COLLECTIONS
        .iter()
        .find(|(name, _)| query_name.contains(name) || name.contains(query_name))
    {
        return collection;
    }

    let lower = query_name.to_lowercase();
    if CHARGING_KEYWORDS.iter().any(|k| lower.contains(k)) {
        "charging_stations"
    } else if POPULATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        "ev_population_data"
    } else {
        "ev_sales_data"
    }
}
