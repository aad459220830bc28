mod normalization;
mod persistence;
